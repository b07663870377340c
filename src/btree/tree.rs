//! # B-Tree Operations
//!
//! Search, insertion, deletion and ordered traversal over pages fetched
//! through the pager. The tree stores byte-string keys compared by memcmp;
//! all keys and payloads live in leaves, interior pages carry only routing
//! separators (copies of leaf keys).
//!
//! ## Architecture Overview
//!
//! ```text
//! BTree ── borrows ──> Pager ── owns ──> PageCache / Journal / Locks
//!   │
//!   └── Cursor: SmallVec<[Frame; MAX_TREE_DEPTH]> of (page_no, index)
//! ```
//!
//! Pages reference each other exclusively by page number; a [`Cursor`]
//! records the descent path so `next`/`prev` climb and re-descend without
//! parent pointers on the pages themselves.
//!
//! ## Balancing
//!
//! Inserts split top-down: while descending, any interior page too full to
//! absorb one more maximal separator is split first, so a child split
//! always finds room for its separator in the parent. A split gathers the
//! page's cells into a bump arena and redistributes them into two pages by
//! even byte counts. The root never moves: splitting it copies its cells
//! to a fresh child and the root becomes a one-branch interior page
//! (height grows at the top, keeping every leaf at the same depth).
//!
//! Deletes rebalance bottom-up: a page whose live content drops under
//! `MIN_FILL_PCT` gathers itself and one adjacent sibling, then either
//! merges into one page or redistributes into two. Merging propagates the
//! underflow check to the parent; an interior root left with no separators
//! absorbs its sole child and the tree shrinks.
//!
//! ## Cursor validity
//!
//! Any insert or delete invalidates open cursors on the same tree (the
//! descent paths they cache may no longer exist). Re-seek after mutating.

use std::cmp::Ordering;

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::btree::node;
use crate::config::{
    CELL_POINTER_SIZE, MAX_KEY_LEN, MAX_LOCAL_PAYLOAD, MAX_TREE_DEPTH, MIN_FILL_PCT,
    PAGE_HEADER_SIZE, PAGE_USABLE_SIZE,
};
use crate::error::{kind_err, ErrorKind};
use crate::io::Vfs;
use crate::storage::{
    header_offset, page_header, page_header_mut, PageHeader, PageRef, PageType, Pager,
};

/// Payload bytes one overflow page carries after its header.
const OVERFLOW_CAPACITY: usize = PAGE_USABLE_SIZE;

/// Largest interior cell: child pointer, key-length varint, maximal key.
/// Interior pages keep room for one of these so child splits never find
/// the parent full.
const MAX_INTERIOR_CELL_SIZE: usize = 4 + 2 + MAX_KEY_LEN;

#[derive(Debug, Clone, Copy)]
struct Frame {
    page_no: u32,
    /// Cell index on a leaf; branch taken (0..=cell_count) on an interior.
    index: u16,
}

/// Descent path into the tree. Invalid (empty) until positioned by `seek`,
/// `first` or `last`, and after any traversal walks off either end.
#[derive(Debug, Default)]
pub struct Cursor {
    stack: SmallVec<[Frame; MAX_TREE_DEPTH]>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        !self.stack.is_empty()
    }

    fn leaf(&self) -> Result<Frame> {
        self.stack.last().copied().ok_or_else(|| {
            kind_err(ErrorKind::Misuse, "cursor is not positioned on an entry")
        })
    }
}

/// B-tree rooted at a fixed page, borrowing the pager for the duration of
/// the operation batch.
pub struct BTree<'p, V: Vfs> {
    pager: &'p mut Pager<V>,
    root: u32,
}

impl<'p, V: Vfs> BTree<'p, V> {
    pub fn new(pager: &'p mut Pager<V>, root: u32) -> Self {
        Self { pager, root }
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Positions `cur` on `key` or its successor. Returns how the entry
    /// under the cursor compares to the target: `Equal` for an exact hit,
    /// `Greater` when positioned on the next larger key, `None` when every
    /// key is smaller (cursor invalid).
    pub fn seek(&mut self, cur: &mut Cursor, key: &[u8]) -> Result<Option<Ordering>> {
        cur.stack.clear();

        let mut page_no = self.root;
        loop {
            self.check_depth(cur.stack.len())?;

            let page = self.pager.fetch(page_no)?;
            let data = page.read();

            if page_header(&data[..], page_no)?.page_type().is_interior() {
                let branch = node::find_branch(&data[..], page_no, key)?;
                let child = node::child_at(&data[..], page_no, branch)?;
                drop(data);
                cur.stack.push(Frame { page_no, index: branch as u16 });
                page_no = child;
                continue;
            }

            let (idx, exact) = node::find_in_leaf(&data[..], page_no, key)?;
            let count = node::cell_count(&data[..], page_no)?;
            drop(data);

            cur.stack.push(Frame { page_no, index: idx as u16 });
            return if exact {
                Ok(Some(Ordering::Equal))
            } else if idx < count {
                Ok(Some(Ordering::Greater))
            } else if self.advance(cur)? {
                Ok(Some(Ordering::Greater))
            } else {
                Ok(None)
            };
        }
    }

    /// Positions on the smallest key. Returns false on an empty tree.
    pub fn first(&mut self, cur: &mut Cursor) -> Result<bool> {
        cur.stack.clear();
        self.descend_first(cur, self.root)
    }

    /// Positions on the largest key. Returns false on an empty tree.
    pub fn last(&mut self, cur: &mut Cursor) -> Result<bool> {
        cur.stack.clear();
        self.descend_last(cur, self.root)
    }

    /// Steps to the next key in order. Returns false (and invalidates the
    /// cursor) past the last entry.
    pub fn next(&mut self, cur: &mut Cursor) -> Result<bool> {
        let frame = cur.leaf()?;

        let page = self.pager.fetch(frame.page_no)?;
        let count = node::cell_count(&page.read()[..], frame.page_no)?;
        drop(page);

        if (frame.index as usize) + 1 < count {
            cur.stack.last_mut().expect("leaf frame").index += 1;
            return Ok(true);
        }
        self.advance(cur)
    }

    /// Steps to the previous key in order.
    pub fn prev(&mut self, cur: &mut Cursor) -> Result<bool> {
        let frame = cur.leaf()?;

        if frame.index > 0 {
            cur.stack.last_mut().expect("leaf frame").index -= 1;
            return Ok(true);
        }
        self.retreat(cur)
    }

    /// The key under the cursor.
    pub fn key(&mut self, cur: &Cursor) -> Result<Vec<u8>> {
        let frame = cur.leaf()?;
        let page = self.pager.fetch(frame.page_no)?;
        let data = page.read();
        let cell = node::leaf_cell(&data[..], frame.page_no, frame.index as usize)?;
        Ok(cell.key.to_vec())
    }

    /// The full payload under the cursor, overflow chain included.
    pub fn payload(&mut self, cur: &Cursor) -> Result<Vec<u8>> {
        let frame = cur.leaf()?;

        let (mut out, overflow, remaining) = {
            let page = self.pager.fetch(frame.page_no)?;
            let data = page.read();
            let cell = node::leaf_cell(&data[..], frame.page_no, frame.index as usize)?;
            let remaining = cell.payload_len as usize - cell.local.len();
            (cell.local.to_vec(), cell.overflow, remaining)
        };

        if overflow != 0 {
            self.read_overflow(overflow, remaining, &mut out)?;
        }
        Ok(out)
    }

    /// Point lookup.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cur = Cursor::new();
        match self.seek(&mut cur, key)? {
            Some(Ordering::Equal) => Ok(Some(self.payload(&cur)?)),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Inserts `key` -> `payload`, replacing any existing entry for the
    /// key. Splits full pages top-down during the descent and retries, so
    /// the insertion itself always lands in a leaf with room.
    pub fn insert(&mut self, key: &[u8], payload: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(kind_err(
                ErrorKind::Misuse,
                format!("key length {} exceeds maximum {}", key.len(), MAX_KEY_LEN),
            ));
        }

        loop {
            let mut stack: SmallVec<[Frame; MAX_TREE_DEPTH]> = SmallVec::new();
            let mut page_no = self.root;

            // Descend, splitting crowded interior pages on the way.
            let (leaf_no, idx, exact) = loop {
                self.check_depth(stack.len())?;

                let page = self.pager.fetch(page_no)?;
                let data = page.read();

                if page_header(&data[..], page_no)?.page_type().is_interior() {
                    let free = node::free_total(&data[..], page_no)?;
                    if free < MAX_INTERIOR_CELL_SIZE + CELL_POINTER_SIZE {
                        drop(data);
                        drop(page);
                        self.split(&stack, page_no)?;
                        break (0, 0, false); // restart descent
                    }

                    let branch = node::find_branch(&data[..], page_no, key)?;
                    let child = node::child_at(&data[..], page_no, branch)?;
                    drop(data);
                    stack.push(Frame { page_no, index: branch as u16 });
                    page_no = child;
                    continue;
                }

                let (idx, exact) = node::find_in_leaf(&data[..], page_no, key)?;
                break (page_no, idx, exact);
            };
            if leaf_no == 0 {
                continue; // a split restructured the path
            }

            if exact {
                self.remove_leaf_entry(leaf_no, idx)?;
            }

            let (local, overflow) = if payload.len() > MAX_LOCAL_PAYLOAD {
                let first = self.write_overflow(&payload[MAX_LOCAL_PAYLOAD..])?;
                (&payload[..MAX_LOCAL_PAYLOAD], first)
            } else {
                (payload, 0)
            };
            let cell = node::encode_leaf_cell(key, payload.len() as u64, local, overflow);

            let page = self.pager.fetch(leaf_no)?;
            self.pager.mark_dirty(&page)?;
            let fitted = node::insert_cell(&mut page.write()[..], leaf_no, idx, &cell)?;
            drop(page);

            if fitted {
                return Ok(());
            }

            // Leaf full: drop the chain we wrote (the retry rebuilds it),
            // split, and run the descent again.
            if overflow != 0 {
                self.free_overflow(overflow)?;
            }
            self.split(&stack, leaf_no)?;
        }
    }

    /// Deletes `key`, returning whether it existed. Underfull pages are
    /// rebalanced with a sibling, walking up as merges shrink the parent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let mut stack: SmallVec<[Frame; MAX_TREE_DEPTH]> = SmallVec::new();
        let mut page_no = self.root;

        let (leaf_no, idx) = loop {
            self.check_depth(stack.len())?;

            let page = self.pager.fetch(page_no)?;
            let data = page.read();

            if page_header(&data[..], page_no)?.page_type().is_interior() {
                let branch = node::find_branch(&data[..], page_no, key)?;
                let child = node::child_at(&data[..], page_no, branch)?;
                drop(data);
                stack.push(Frame { page_no, index: branch as u16 });
                page_no = child;
                continue;
            }

            let (idx, exact) = node::find_in_leaf(&data[..], page_no, key)?;
            if !exact {
                return Ok(false);
            }
            break (page_no, idx);
        };

        self.remove_leaf_entry(leaf_no, idx)?;
        self.rebalance(&mut stack, leaf_no)?;
        Ok(true)
    }

    /// Removes leaf cell `idx`, freeing its overflow chain first.
    fn remove_leaf_entry(&mut self, leaf_no: u32, idx: usize) -> Result<()> {
        let overflow = {
            let page = self.pager.fetch(leaf_no)?;
            let data = page.read();
            node::leaf_cell(&data[..], leaf_no, idx)?.overflow
        };
        if overflow != 0 {
            self.free_overflow(overflow)?;
        }

        let page = self.pager.fetch(leaf_no)?;
        self.pager.mark_dirty(&page)?;
        let mut data = page.write();
        node::remove_cell(&mut data[..], leaf_no, idx)
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth >= MAX_TREE_DEPTH {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("tree deeper than {MAX_TREE_DEPTH} levels (page cycle?)"),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Traversal internals
    // ------------------------------------------------------------------

    fn descend_first(&mut self, cur: &mut Cursor, mut page_no: u32) -> Result<bool> {
        loop {
            self.check_depth(cur.stack.len())?;

            let page = self.pager.fetch(page_no)?;
            let data = page.read();
            let header = page_header(&data[..], page_no)?;

            if header.page_type().is_interior() {
                let child = node::child_at(&data[..], page_no, 0)?;
                drop(data);
                cur.stack.push(Frame { page_no, index: 0 });
                page_no = child;
                continue;
            }

            let count = header.cell_count() as usize;
            drop(data);
            cur.stack.push(Frame { page_no, index: 0 });
            if count == 0 {
                // Transiently empty leaf: keep walking right.
                return self.advance(cur);
            }
            return Ok(true);
        }
    }

    fn descend_last(&mut self, cur: &mut Cursor, mut page_no: u32) -> Result<bool> {
        loop {
            self.check_depth(cur.stack.len())?;

            let page = self.pager.fetch(page_no)?;
            let data = page.read();
            let header = page_header(&data[..], page_no)?;
            let count = header.cell_count() as usize;

            if header.page_type().is_interior() {
                let child = node::child_at(&data[..], page_no, count)?;
                drop(data);
                cur.stack.push(Frame { page_no, index: count as u16 });
                page_no = child;
                continue;
            }

            drop(data);
            if count == 0 {
                cur.stack.push(Frame { page_no, index: 0 });
                return self.retreat(cur);
            }
            cur.stack.push(Frame { page_no, index: (count - 1) as u16 });
            return Ok(true);
        }
    }

    /// Climbs off an exhausted leaf to the leftmost entry of the next one.
    fn advance(&mut self, cur: &mut Cursor) -> Result<bool> {
        cur.stack.pop();

        while let Some(frame) = cur.stack.last().copied() {
            let page = self.pager.fetch(frame.page_no)?;
            let data = page.read();
            let count = node::cell_count(&data[..], frame.page_no)?;

            if (frame.index as usize) < count {
                let child = node::child_at(&data[..], frame.page_no, frame.index as usize + 1)?;
                drop(data);
                cur.stack.last_mut().expect("frame").index += 1;
                return self.descend_first(cur, child);
            }

            drop(data);
            cur.stack.pop();
        }
        Ok(false)
    }

    /// Mirror of [`BTree::advance`] for reverse traversal.
    fn retreat(&mut self, cur: &mut Cursor) -> Result<bool> {
        cur.stack.pop();

        while let Some(frame) = cur.stack.last().copied() {
            if frame.index > 0 {
                let page = self.pager.fetch(frame.page_no)?;
                let data = page.read();
                let child = node::child_at(&data[..], frame.page_no, frame.index as usize - 1)?;
                drop(data);
                cur.stack.last_mut().expect("frame").index -= 1;
                return self.descend_last(cur, child);
            }
            cur.stack.pop();
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Splitting
    // ------------------------------------------------------------------

    /// Splits `page_no`; `stack` is the descent path to its parent (empty
    /// when splitting the root).
    fn split(&mut self, stack: &[Frame], page_no: u32) -> Result<()> {
        if page_no == self.root {
            return self.split_root();
        }
        let parent = *stack.last().ok_or_else(|| {
            kind_err(ErrorKind::Corrupt, "non-root page with no descent path")
        })?;
        self.split_nonroot(parent, page_no)
    }

    /// Copies the root's cells into a fresh child and turns the root into
    /// a one-branch interior page. Height grows at the top; the root page
    /// number never changes.
    fn split_root(&mut self) -> Result<()> {
        let root = self.root;
        let arena = Bump::new();

        let (ptype, right_child, cells) = self.gather(&arena, root)?;

        let child = self.pager.allocate_page()?;
        let child_no = child.page_no();
        self.write_node(&child, ptype, &cells, right_child)?;
        drop(child);

        let page = self.pager.fetch(root)?;
        self.pager.mark_dirty(&page)?;
        let mut data = page.write();
        let base = header_offset(root);
        data[base..].fill(0);
        *page_header_mut(&mut data[..], root)? =
            PageHeader::new(ptype.interior_of(), base);
        page_header_mut(&mut data[..], root)?.set_right_child(child_no);
        Ok(())
    }

    fn split_nonroot(&mut self, parent: Frame, page_no: u32) -> Result<()> {
        let arena = Bump::new();
        let (ptype, right_child, cells) = self.gather(&arena, page_no)?;

        ensure!(
            cells.len() >= 2,
            "page {page_no} too full to split with {} cells",
            cells.len()
        );

        let split_at = split_point(&cells);

        // The boundary cell's key becomes the separator. On an interior
        // page the cell itself moves up (its child caps the left half); on
        // a leaf the separator is a copy and the cell stays.
        let (sep_key, left_cells, left_right, right_cells, right_right): (
            &[u8],
            &[&[u8]],
            u32,
            &[&[u8]],
            u32,
        ) = if ptype.is_interior() {
            let boundary = node::parse_interior_cell(cells[split_at])?;
            (
                boundary.key,
                &cells[..split_at],
                boundary.child,
                &cells[split_at + 1..],
                right_child,
            )
        } else {
            let first_right = node::parse_leaf_cell(cells[split_at])?;
            (first_right.key, &cells[..split_at], 0, &cells[split_at..], 0)
        };

        let right_page = self.pager.allocate_page()?;
        let right_no = right_page.page_no();
        self.write_node(&right_page, ptype, right_cells, right_right)?;
        drop(right_page);

        let left_page = self.pager.fetch(page_no)?;
        self.write_node(&left_page, ptype, left_cells, left_right)?;
        drop(left_page);

        // Parent: the split page's branch now leads to the right half; a
        // new separator cell routes the left half.
        let parent_page = self.pager.fetch(parent.page_no)?;
        self.pager.mark_dirty(&parent_page)?;
        let mut data = parent_page.write();

        let branch = parent.index as usize;
        let count = node::cell_count(&data[..], parent.page_no)?;
        if branch == count {
            page_header_mut(&mut data[..], parent.page_no)?.set_right_child(right_no);
        } else {
            node::set_cell_child(&mut data[..], parent.page_no, branch, right_no)?;
        }

        let sep_cell = node::encode_interior_cell(page_no, sep_key);
        let fitted = node::insert_cell(&mut data[..], parent.page_no, branch, &sep_cell)?;
        ensure!(fitted, "parent page {} rejected separator after pre-split", parent.page_no);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete rebalancing
    // ------------------------------------------------------------------

    /// Walks the descent path upward, fixing every page that fell under
    /// the minimum fill. Merges shrink the parent, which may cascade.
    fn rebalance(
        &mut self,
        stack: &mut SmallVec<[Frame; MAX_TREE_DEPTH]>,
        mut page_no: u32,
    ) -> Result<()> {
        loop {
            if page_no == self.root {
                return self.shrink_root();
            }

            let used = {
                let page = self.pager.fetch(page_no)?;
                let data = page.read();
                node::used_bytes(&data[..], page_no)?
            };
            if used * 100 >= node::usable_space(page_no) * MIN_FILL_PCT {
                return Ok(());
            }

            let parent = stack.pop().ok_or_else(|| {
                kind_err(ErrorKind::Corrupt, "non-root page with no descent path")
            })?;

            if !self.balance_underflow(parent, page_no)? {
                return Ok(());
            }
            page_no = parent.page_no;
        }
    }

    /// Gathers the underfull page and one adjacent sibling, then merges
    /// them into one page or redistributes into two. Returns true when a
    /// merge removed a separator from the parent.
    fn balance_underflow(&mut self, parent: Frame, page_no: u32) -> Result<bool> {
        let parent_no = parent.page_no;
        let branch = parent.index as usize;

        let (sep_idx, left_no, right_no, sep_key, parent_count) = {
            let page = self.pager.fetch(parent_no)?;
            let data = page.read();
            let count = node::cell_count(&data[..], parent_no)?;
            if count == 0 {
                // Single-child parent: nothing to borrow from. The parent
                // itself is drastically underfull and handled above us.
                return Ok(false);
            }

            let sep_idx = if branch > 0 { branch - 1 } else { 0 };
            let left = node::child_at(&data[..], parent_no, sep_idx)?;
            let right = node::child_at(&data[..], parent_no, sep_idx + 1)?;
            let sep_key = node::interior_cell(&data[..], parent_no, sep_idx)?.key.to_vec();
            (sep_idx, left, right, sep_key, count)
        };
        debug_assert!(left_no == page_no || right_no == page_no);

        let arena = Bump::new();
        let (ptype, left_right_child, left_cells) = self.gather(&arena, left_no)?;
        let (_, right_right_child, right_cells) = self.gather(&arena, right_no)?;

        let mut cells = BumpVec::with_capacity_in(left_cells.len() + right_cells.len() + 1, &arena);
        cells.extend(left_cells.iter().copied());
        if ptype.is_interior() {
            // The separator drops back down between the halves.
            let sep_cell = node::encode_interior_cell(left_right_child, &sep_key);
            let copied: &[u8] = arena.alloc_slice_copy(&sep_cell);
            cells.push(copied);
        }
        cells.extend(right_cells.iter().copied());
        let merged_right_child = right_right_child;

        let total: usize = cells.iter().map(|c| c.len() + CELL_POINTER_SIZE).sum();

        if total <= node::usable_space(left_no) {
            // Merge into the left page; the right page goes to the freelist.
            let left_page = self.pager.fetch(left_no)?;
            self.write_node(&left_page, ptype, &cells, merged_right_child)?;
            drop(left_page);

            let parent_page = self.pager.fetch(parent_no)?;
            self.pager.mark_dirty(&parent_page)?;
            {
                let mut data = parent_page.write();
                if sep_idx + 1 == parent_count {
                    page_header_mut(&mut data[..], parent_no)?.set_right_child(left_no);
                } else {
                    node::set_cell_child(&mut data[..], parent_no, sep_idx + 1, left_no)?;
                }
                node::remove_cell(&mut data[..], parent_no, sep_idx)?;
            }
            drop(parent_page);

            self.pager.free_page(right_no)?;
            return Ok(true);
        }

        // Redistribute across the two pages with a fresh separator. Check
        // the parent can take the (possibly longer) separator first; when
        // it cannot, leave the underfull page alone rather than wedge the
        // parent mid-edit.
        let split_at = split_point(&cells);
        let (new_sep, new_left_cells, new_left_right, new_right_cells, new_right_right): (
            Vec<u8>,
            &[&[u8]],
            u32,
            &[&[u8]],
            u32,
        ) = if ptype.is_interior() {
            let boundary = node::parse_interior_cell(cells[split_at])?;
            (
                boundary.key.to_vec(),
                &cells[..split_at],
                boundary.child,
                &cells[split_at + 1..],
                merged_right_child,
            )
        } else {
            let first_right = node::parse_leaf_cell(cells[split_at])?;
            (first_right.key.to_vec(), &cells[..split_at], 0, &cells[split_at..], 0)
        };

        let new_sep_cell = node::encode_interior_cell(left_no, &new_sep);
        {
            let parent_page = self.pager.fetch(parent_no)?;
            let data = parent_page.read();
            let old_size = node::cell_bytes(&data[..], parent_no, sep_idx)?.len();
            let free = node::free_total(&data[..], parent_no)?;
            if free + old_size < new_sep_cell.len() {
                return Ok(false);
            }
        }

        let left_page = self.pager.fetch(left_no)?;
        self.write_node(&left_page, ptype, new_left_cells, new_left_right)?;
        drop(left_page);
        let right_page = self.pager.fetch(right_no)?;
        self.write_node(&right_page, ptype, new_right_cells, new_right_right)?;
        drop(right_page);

        let parent_page = self.pager.fetch(parent_no)?;
        self.pager.mark_dirty(&parent_page)?;
        let mut data = parent_page.write();
        node::remove_cell(&mut data[..], parent_no, sep_idx)?;
        let fitted = node::insert_cell(&mut data[..], parent_no, sep_idx, &new_sep_cell)?;
        ensure!(fitted, "parent page {parent_no} rejected separator after space check");
        Ok(false)
    }

    /// While the root is an interior page with no separators, its sole
    /// child's content moves up and the child is freed. Skipped when the
    /// child holds more than the root's smaller usable area.
    fn shrink_root(&mut self) -> Result<()> {
        loop {
            let root = self.root;
            let (is_trivial, child_no) = {
                let page = self.pager.fetch(root)?;
                let data = page.read();
                let header = page_header(&data[..], root)?;
                (
                    header.page_type().is_interior() && header.cell_count() == 0,
                    header.right_child(),
                )
            };
            if !is_trivial || child_no == 0 {
                return Ok(());
            }

            let arena = Bump::new();
            let (ptype, right_child, cells) = self.gather(&arena, child_no)?;

            let total: usize = cells.iter().map(|c| c.len() + CELL_POINTER_SIZE).sum();
            if total > node::usable_space(root) {
                return Ok(());
            }

            let page = self.pager.fetch(root)?;
            self.write_node(&page, ptype, &cells, right_child)?;
            drop(page);

            self.pager.free_page(child_no)?;
        }
    }

    // ------------------------------------------------------------------
    // Page rebuild helpers
    // ------------------------------------------------------------------

    /// Copies a page's cells into the arena so the page can be rewritten.
    fn gather<'a>(
        &mut self,
        arena: &'a Bump,
        page_no: u32,
    ) -> Result<(PageType, u32, BumpVec<'a, &'a [u8]>)> {
        let page = self.pager.fetch(page_no)?;
        let data = page.read();
        let header = page_header(&data[..], page_no)?;
        let ptype = header.page_type();
        let right_child = header.right_child();
        let count = header.cell_count() as usize;

        let mut cells = BumpVec::with_capacity_in(count, arena);
        for idx in 0..count {
            let cell = node::cell_bytes(&data[..], page_no, idx)?;
            let copied: &[u8] = arena.alloc_slice_copy(cell);
            cells.push(copied);
        }
        Ok((ptype, right_child, cells))
    }

    /// Rebuilds a page from scratch with the given cells, journaling its
    /// pre-image first.
    fn write_node(
        &mut self,
        page: &PageRef,
        ptype: PageType,
        cells: &[&[u8]],
        right_child: u32,
    ) -> Result<()> {
        self.pager.mark_dirty(page)?;
        let page_no = page.page_no();
        let mut data = page.write();

        let base = header_offset(page_no);
        data[base..].fill(0);
        *page_header_mut(&mut data[..], page_no)? = PageHeader::new(ptype, base);
        page_header_mut(&mut data[..], page_no)?.set_right_child(right_child);

        for (idx, cell) in cells.iter().enumerate() {
            let fitted = node::insert_cell(&mut data[..], page_no, idx, cell)?;
            ensure!(fitted, "cell {idx} does not fit while rebuilding page {page_no}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Overflow chains
    // ------------------------------------------------------------------

    /// Writes `rest` into a chain of overflow pages, back to front so each
    /// page links to an already-written successor. Returns the head.
    fn write_overflow(&mut self, rest: &[u8]) -> Result<u32> {
        let mut next = 0u32;

        let chunks: Vec<&[u8]> = rest.chunks(OVERFLOW_CAPACITY).collect();
        for chunk in chunks.into_iter().rev() {
            let page = self.pager.allocate_page()?;
            let page_no = page.page_no();
            let mut data = page.write();

            *page_header_mut(&mut data[..], page_no)? = PageHeader::new(PageType::Overflow, 0);
            page_header_mut(&mut data[..], page_no)?.set_next_overflow(next);
            data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);

            drop(data);
            drop(page);
            next = page_no;
        }
        Ok(next)
    }

    fn read_overflow(&mut self, first: u32, mut remaining: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut page_no = first;
        let mut hops = 0usize;
        let max_hops = remaining / OVERFLOW_CAPACITY + 2;

        while remaining > 0 {
            hops += 1;
            if page_no == 0 || hops > max_hops {
                return Err(kind_err(
                    ErrorKind::Corrupt,
                    "overflow chain shorter than the recorded payload length",
                ));
            }

            let page = self.pager.fetch(page_no)?;
            let data = page.read();
            let header = page_header(&data[..], page_no)?;
            if header.page_type() != PageType::Overflow {
                return Err(kind_err(
                    ErrorKind::Corrupt,
                    format!("page {page_no} in overflow chain is not an overflow page"),
                ));
            }

            let take = remaining.min(OVERFLOW_CAPACITY);
            out.extend_from_slice(&data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + take]);
            remaining -= take;
            page_no = header.next_overflow();
        }
        Ok(())
    }

    fn free_overflow(&mut self, first: u32) -> Result<()> {
        let mut page_no = first;
        let mut hops = 0usize;

        while page_no != 0 {
            hops += 1;
            if hops > self.pager.page_count() as usize {
                return Err(kind_err(ErrorKind::Corrupt, "cycle in overflow chain"));
            }

            let next = {
                let page = self.pager.fetch(page_no)?;
                let data = page.read();
                page_header(&data[..], page_no)?.next_overflow()
            };
            self.pager.free_page(page_no)?;
            page_no = next;
        }
        Ok(())
    }
}

/// Index of the first cell of the right half when splitting `cells` into
/// two chunks of roughly even byte weight. Both halves stay non-empty.
fn split_point(cells: &[&[u8]]) -> usize {
    let total: usize = cells.iter().map(|c| c.len() + CELL_POINTER_SIZE).sum();
    let mut left = 0usize;

    for (idx, cell) in cells.iter().enumerate() {
        let next = left + cell.len() + CELL_POINTER_SIZE;
        if idx > 0 && next > total / 2 {
            return idx;
        }
        left = next;
    }
    cells.len() - 1
}
