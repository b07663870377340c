//! # JotDB Configuration Constants
//!
//! This module centralizes configuration constants, grouping interdependent
//! values together. Constants that depend on each other are co-located so a
//! change in one is checked against the others.
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, fixed)
//!       │
//!       ├─> PAGE_USABLE_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       ├─> DB_HEADER_SIZE (64 bytes, page 1 only)
//!       │
//!       ├─> PAGE1_USABLE_SIZE (derived: PAGE_USABLE_SIZE - DB_HEADER_SIZE)
//!       │
//!       ├─> MAX_LOCAL_PAYLOAD (PAGE_USABLE_SIZE / 8; bounds how much of a
//!       │     cell's payload stays on the page before an overflow chain)
//!       │
//!       └─> MAX_KEY_LEN (1024; with MAX_LOCAL_PAYLOAD this caps
//!             MAX_LEAF_CELL_SIZE so any page holds at least two maximal
//!             cells, which page splitting depends on)
//!
//! MIN_FILL_PCT (25)
//!       │
//!       └─> A page whose cell content drops below this share of usable
//!           space is rebalanced with a sibling on delete.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `PAGE_USABLE_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE`
//! 2. `2 * (MAX_LEAF_CELL_SIZE + CELL_POINTER_SIZE) <= PAGE1_USABLE_SIZE` —
//!    even the root page (smallest usable area) holds two maximal cells, so
//!    a full page can always be split into two non-empty halves
//! 3. `JOURNAL_RECORD_SIZE == 4 + PAGE_SIZE + 4` (page number, image, crc)

/// Unit of I/O and caching. Every page in the database file is this size.
pub const PAGE_SIZE: usize = 4096;

/// Every page starts with a fixed 16-byte header.
pub const PAGE_HEADER_SIZE: usize = 16;

pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Page 1 carries the database file header before its page header.
pub const DB_HEADER_SIZE: usize = 64;

pub const PAGE1_USABLE_SIZE: usize = PAGE_USABLE_SIZE - DB_HEADER_SIZE;

/// Each entry in a page's cell pointer array is a 2-byte offset.
pub const CELL_POINTER_SIZE: usize = 2;

/// Payload stored inline in a leaf cell before spilling to an overflow chain.
pub const MAX_LOCAL_PAYLOAD: usize = PAGE_USABLE_SIZE / 8;

/// Keys never overflow; longer keys are rejected as misuse.
pub const MAX_KEY_LEN: usize = 1024;

/// Largest on-page leaf cell: two varints (max 9 + 2 bytes), a maximal key,
/// a full local payload, and an overflow page pointer.
pub const MAX_LEAF_CELL_SIZE: usize = 9 + 2 + MAX_KEY_LEN + MAX_LOCAL_PAYLOAD + 4;

/// Delete rebalances a page once its content falls below this percentage of
/// usable space.
pub const MIN_FILL_PCT: usize = 25;

/// Deepest tree the cursor stack handles without spilling to the heap.
pub const MAX_TREE_DEPTH: usize = 20;

pub const DB_MAGIC: [u8; 16] = *b"JotDB format 1\0\0";
pub const DB_FORMAT_VERSION: u32 = 1;

pub const JOURNAL_MAGIC: [u8; 8] = *b"JotDBjrn";
pub const JOURNAL_HEADER_SIZE: usize = 32;
pub const JOURNAL_RECORD_SIZE: usize = 4 + PAGE_SIZE + 4;

/// Page-number sentinel that introduces a master-journal record.
pub const MASTER_JOURNAL_SENTINEL: u32 = 0;

pub const DEFAULT_CACHE_PAGES: usize = 256;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 100;

/// Assumed device sector size recorded in the journal header.
pub const SECTOR_SIZE: u32 = 512;

const _: () = assert!(PAGE_USABLE_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE);
const _: () = assert!(2 * (MAX_LEAF_CELL_SIZE + CELL_POINTER_SIZE) <= PAGE1_USABLE_SIZE);
const _: () = assert!(JOURNAL_RECORD_SIZE == 4 + PAGE_SIZE + 4);
