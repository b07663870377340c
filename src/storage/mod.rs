//! # Storage Layer
//!
//! Pages, the page cache, the pager, and free-page tracking. The layering,
//! bottom up:
//!
//! ```text
//! io::DatabaseFile      byte-addressable file (read_at / write_at / sync)
//!        │
//! storage::pager        fetch/release, dirty tracking, journal-before-write,
//!        │              cache spill, allocation, sticky error state
//! storage::cache        SIEVE eviction, pin counts, PageRef RAII
//!        │
//! storage::page         fixed 4KB page, 16-byte header, cell pointer array
//! storage::header       64-byte database file header on page 1
//! storage::freelist     trunk-page free list for page reuse
//! ```
//!
//! Pages are addressed by 1-based page number; page N lives at byte offset
//! `(N - 1) * PAGE_SIZE`. Page 1 additionally carries the database file
//! header in its first 64 bytes, so its page header and cell area start at
//! `DB_HEADER_SIZE`.
//!
//! Everything above this layer refers to pages only by number; parent,
//! child and sibling relationships in the B-tree are plain `u32` page
//! numbers resolved through `Pager::fetch`, never in-memory pointers.

mod cache;
mod freelist;
mod header;
mod page;
mod pager;

pub use cache::{PageCache, PageRef, PageSlot};
pub use freelist::Freelist;
pub use header::DbHeader;
pub use page::{page_header, page_header_mut, validate_page, PageHeader, PageType};
pub use pager::{journal_path_for, Pager};

pub use crate::config::{
    DB_HEADER_SIZE, PAGE1_USABLE_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_USABLE_SIZE,
};

/// Byte offset of page `page_no` (1-based) in the database file.
pub fn page_offset(page_no: u32) -> u64 {
    (page_no as u64 - 1) * PAGE_SIZE as u64
}

/// Offset of the page header within a page: page 1 places it after the
/// database file header.
pub fn header_offset(page_no: u32) -> usize {
    if page_no == 1 {
        DB_HEADER_SIZE
    } else {
        0
    }
}
