//! # JotDB - Embedded Transactional Storage Engine
//!
//! JotDB is an embedded key/value storage engine in the rollback-journal
//! tradition: a single database file of fixed 4KB pages, an on-disk B-tree
//! keyed by byte strings, and transactions made atomic by journaling each
//! page's pre-image before it is overwritten.
//!
//! ## Quick Start
//!
//! ```ignore
//! use jotdb::Database;
//!
//! let mut db = Database::open("./app.db")?;
//!
//! db.put(b"user:1", b"Alice")?;
//! assert_eq!(db.get(b"user:1")?, Some(b"Alice".to_vec()));
//!
//! db.begin_write()?;
//! db.put(b"user:2", b"Bob")?;
//! db.put(b"user:3", b"Carol")?;
//! db.commit()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (Database)         │
//! ├─────────────────────────────────────┤
//! │   B-Tree (cursor, split, merge)     │
//! ├─────────────────────────────────────┤
//! │  Pager (cache, journal, freelist)   │
//! ├─────────────────────────────────────┤
//! │  Rollback Journal │ Advisory Locks  │
//! ├───────────────────┴─────────────────┤
//! │        File I/O (Vfs backends)      │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! A write transaction appends the original image of every page it touches
//! to a sidecar journal file (`<db>-journal`) before modifying the page in
//! memory. Commit syncs the journal, flushes dirty pages, syncs the
//! database, and deletes the journal; the deletion is the commit point.
//! A crash at any earlier moment leaves a hot journal behind, and the next
//! open plays it back to the pre-transaction snapshot. Multi-file atomic
//! commits coordinate through a master journal record.
//!
//! ## Concurrency Model
//!
//! One connection per thread; connections to the same file coordinate
//! through a five-level advisory lock protocol (shared readers, a single
//! reserved writer, exclusive only during the final flush). Lock
//! contention surfaces as a retryable busy error rather than blocking
//! indefinitely.
//!
//! ## Module Overview
//!
//! - [`db`]: connection type and autocommit key/value API
//! - [`btree`]: ordered tree, cursors, overflow chains
//! - [`storage`]: pages, page cache, pager, freelist
//! - [`txn`]: rollback journal and transaction state machine
//! - [`io`]: file abstraction, lock tables, in-memory test backend
//! - [`encoding`]: varint primitives used by cell layouts
//! - [`error`]: error kinds attached to `eyre` reports

pub mod btree;
pub mod config;
pub mod db;
pub mod encoding;
pub mod error;
pub mod io;
pub mod storage;
pub mod txn;

pub use btree::{BTree, Cursor};
pub use config::PagerOptions;
pub use db::Database;
pub use error::{error_kind, ErrorKind};
pub use io::{DiskVfs, MemVfs, Vfs};
pub use storage::Pager;
