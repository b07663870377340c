//! # B-Tree
//!
//! Ordered key/value storage over fixed-size pages. [`node`] handles the
//! byte layout of a single page (cell pointer array, slotted content,
//! binary search); [`tree`] composes pages into a balanced tree with
//! splitting, merging and cursor traversal.
//!
//! Keys are arbitrary byte strings up to `MAX_KEY_LEN`, compared
//! lexicographically. Payloads are unbounded; bytes past
//! `MAX_LOCAL_PAYLOAD` spill into a chain of overflow pages.
//!
//! All page access flows through the pager, so tree operations inherit its
//! transaction discipline: reads require an open read transaction, writes
//! a write transaction, and every page image is journaled before its first
//! modification.

pub mod node;
mod tree;

pub use tree::{BTree, Cursor};
