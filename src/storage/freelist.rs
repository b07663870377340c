//! # Free Page List
//!
//! Pages freed by B-tree merges are threaded onto a list of trunk pages so
//! later allocations reuse them before the file grows. The list head and
//! total count live in the database header; a trunk page holds up to 1018
//! free page numbers.
//!
//! ## Trunk Page Layout
//!
//! ```text
//! Offset  Size     Description
//! 0       16       Page header (type FreeTrunk)
//! 16      4        Next trunk page number (0 = end of list)
//! 20      4        Number of entries on this trunk
//! 24      4 * n    Free page numbers
//! ```
//!
//! Trunk pages are ordinary pages: they are fetched through the cache and
//! journaled before modification, so freelist changes roll back with the
//! rest of the transaction. Allocation pops entries off the head trunk and,
//! when a trunk empties, hands out the trunk page itself.

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::storage::page::{PageHeader, PageType};

const NEXT_OFFSET: usize = PAGE_HEADER_SIZE;
const COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + 8;

/// Free page numbers one trunk page can hold.
pub const TRUNK_CAPACITY: usize = (PAGE_SIZE - ENTRIES_OFFSET) / 4;

/// In-memory view of the freelist bookkeeping from the database header.
/// The on-disk copy is written back at commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Freelist {
    pub(crate) head: u32,
    pub(crate) count: u32,
}

impl Freelist {
    pub fn new(head: u32, count: u32) -> Self {
        Self { head, count }
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }
}

/// Formats `data` as an empty trunk page chaining to `next`.
pub(crate) fn init_trunk(data: &mut [u8], next: u32) {
    data.fill(0);

    let header = PageHeader::new(PageType::FreeTrunk, 0);
    if let Ok(slot) = PageHeader::from_bytes_mut(data) {
        *slot = header;
    }

    data[NEXT_OFFSET..NEXT_OFFSET + 4].copy_from_slice(&next.to_le_bytes());
    data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&0u32.to_le_bytes());
}

pub(crate) fn trunk_next(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[NEXT_OFFSET..NEXT_OFFSET + 4].try_into().expect("4 bytes"))
}

pub(crate) fn trunk_len(data: &[u8]) -> usize {
    u32::from_le_bytes(data[COUNT_OFFSET..COUNT_OFFSET + 4].try_into().expect("4 bytes")) as usize
}

fn set_trunk_len(data: &mut [u8], len: usize) {
    data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(len as u32).to_le_bytes());
}

/// Appends a free page number; the caller checks capacity first.
pub(crate) fn trunk_push(data: &mut [u8], page_no: u32) {
    let len = trunk_len(data);
    debug_assert!(len < TRUNK_CAPACITY);

    let at = ENTRIES_OFFSET + len * 4;
    data[at..at + 4].copy_from_slice(&page_no.to_le_bytes());
    set_trunk_len(data, len + 1);
}

/// Pops the most recently freed page number; the caller checks emptiness.
pub(crate) fn trunk_pop(data: &mut [u8]) -> u32 {
    let len = trunk_len(data);
    debug_assert!(len > 0);

    let at = ENTRIES_OFFSET + (len - 1) * 4;
    let page_no = u32::from_le_bytes(data[at..at + 4].try_into().expect("4 bytes"));
    set_trunk_len(data, len - 1);
    page_no
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_header;

    #[test]
    fn init_trunk_sets_type_and_link() {
        let mut data = vec![0xFFu8; PAGE_SIZE];
        init_trunk(&mut data, 17);

        let header = page_header(&data, 2).unwrap();
        assert_eq!(header.page_type(), PageType::FreeTrunk);
        assert_eq!(trunk_next(&data), 17);
        assert_eq!(trunk_len(&data), 0);
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut data = vec![0u8; PAGE_SIZE];
        init_trunk(&mut data, 0);

        trunk_push(&mut data, 10);
        trunk_push(&mut data, 11);
        trunk_push(&mut data, 12);
        assert_eq!(trunk_len(&data), 3);

        assert_eq!(trunk_pop(&mut data), 12);
        assert_eq!(trunk_pop(&mut data), 11);
        assert_eq!(trunk_pop(&mut data), 10);
        assert_eq!(trunk_len(&data), 0);
    }

    #[test]
    fn capacity_fills_the_page_exactly() {
        assert_eq!(TRUNK_CAPACITY, 1018);

        let mut data = vec![0u8; PAGE_SIZE];
        init_trunk(&mut data, 0);
        for i in 0..TRUNK_CAPACITY as u32 {
            trunk_push(&mut data, 100 + i);
        }
        assert_eq!(trunk_len(&data), TRUNK_CAPACITY);
        assert_eq!(trunk_pop(&mut data), 100 + TRUNK_CAPACITY as u32 - 1);
    }
}
