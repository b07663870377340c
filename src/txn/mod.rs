//! # Transaction Manager
//!
//! Lock-state machine and rollback journal giving atomic commit, rollback
//! and crash recovery. The pager owns one [`TxnState`] and (while writing)
//! one [`Journal`]; the state machine gates every page mutation.
//!
//! ## States
//!
//! ```text
//! Open ──begin_read──> Reader ──begin_write──> WriterLocked
//!                                                   │ first mark_dirty
//!                                                   v
//!                                             WriterCacheMod
//!                                                   │ spill / phase 2 flush
//!                                                   v
//!                                             WriterDbMod
//!                                                   │ phase 2 finishing
//!                                                   v
//!                                            WriterFinished ──> Open
//! ```
//!
//! `Error` is entered when a write fails midway (e.g. a spill partially
//! flushed a page); every subsequent operation fails fast with the saved
//! error kind until `rollback` clears the state via journal playback.
//!
//! ## Two-phase commit
//!
//! Phase 1 (`commit_phase_one`): every dirty page already has a journal
//! record — the write-before-overwrite rule put it there — so phase 1 only
//! appends an optional master-journal pointer and syncs the journal. From
//! this moment the transaction is rollback-able across a crash.
//!
//! Phase 2 (`commit_phase_two`): write all dirty pages to the database
//! file, sync it, then delete the journal and drop back to `Open`. The
//! journal's existence between the phases is the crash-recovery anchor: a
//! crash before the deletion rolls back; after it, the commit is durable.
//!
//! ## Savepoints
//!
//! A [`Savepoint`] snapshots in-memory pre-images of pages first dirtied
//! after its creation, plus the pager's allocation bookkeeping. Rolling
//! back to a savepoint restores cached page contents without touching the
//! journal file — the journal keeps the transaction-start images, which
//! remain the correct full-rollback target.

pub mod journal;

pub use journal::{fresh_nonce, playback_file, read_master, Journal, PlaybackReport};

use std::collections::{HashMap, HashSet};

use crate::config::PAGE_SIZE;

/// Transaction lifecycle of a pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// No transaction; no locks held.
    Open,
    /// Shared lock held; reads allowed.
    Reader,
    /// Reserved lock held, journal header written; nothing dirtied yet.
    WriterLocked,
    /// Pages dirtied in cache; database file still untouched.
    WriterCacheMod,
    /// Some dirty pages flushed to the database file (spill or phase 2).
    WriterDbMod,
    /// Commit phase 2 under way.
    WriterFinished,
    /// Unrecoverable mid-write failure; rollback required.
    Error,
}

impl TxnState {
    pub fn is_writer(self) -> bool {
        matches!(
            self,
            TxnState::WriterLocked
                | TxnState::WriterCacheMod
                | TxnState::WriterDbMod
                | TxnState::WriterFinished
        )
    }

    pub fn can_read(self) -> bool {
        self != TxnState::Open && self != TxnState::Error
    }
}

/// In-transaction snapshot for partial rollback.
pub struct Savepoint {
    /// Pre-images of pages first dirtied after this savepoint was opened.
    pub(crate) preimages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
    pub(crate) captured: HashSet<u32>,
    pub(crate) page_count: u32,
    pub(crate) freelist_head: u32,
    pub(crate) freelist_count: u32,
}

impl Savepoint {
    pub(crate) fn new(page_count: u32, freelist_head: u32, freelist_count: u32) -> Self {
        Self {
            preimages: HashMap::new(),
            captured: HashSet::new(),
            page_count,
            freelist_head,
            freelist_count,
        }
    }
}
