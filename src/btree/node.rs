//! # Node Layout
//!
//! Cell-level accessors over raw page bytes. A B-tree page stores a sorted
//! array of 2-byte cell pointers growing down from the page header and cell
//! content growing up from the page end; this module maintains both without
//! ever moving content on insert or delete.
//!
//! ## Cell Formats
//!
//! ```text
//! Leaf:      varint key_len | varint payload_len | key | local payload
//!            [| overflow_page u32]        (when payload_len > MAX_LOCAL)
//! Interior:  child_page u32 | varint key_len | key
//! ```
//!
//! An interior cell's key is the separator: every key in `child_page`'s
//! subtree compares strictly less than it. Separators are copies of leaf
//! keys, so a key equal to a separator always lives in the subtree to the
//! separator's right.
//!
//! ## Fragmentation
//!
//! Removing a cell whose content is not adjacent to the free gap leaves a
//! hole, accounted in the header's `frag_bytes`. Insertion falls back to
//! [`defragment`] when the contiguous gap is too small but gap plus holes
//! would fit. All offsets are page-absolute, so page 1 (whose cell area
//! starts after the database header) needs no special casing beyond its
//! header base.

use eyre::{ensure, Result};

use crate::config::{CELL_POINTER_SIZE, MAX_LOCAL_PAYLOAD, PAGE_SIZE};
use crate::encoding::{decode_varint, encode_varint, varint_len};
use crate::error::{kind_err, ErrorKind};
use crate::storage::{header_offset, page_header, page_header_mut, PageType, PAGE_HEADER_SIZE};

/// Parsed view of a leaf cell.
#[derive(Debug)]
pub struct LeafCell<'a> {
    pub key: &'a [u8],
    /// The on-page portion of the payload.
    pub local: &'a [u8],
    /// Full payload length, counting overflow.
    pub payload_len: u64,
    /// First overflow page, 0 when the payload is entirely local.
    pub overflow: u32,
}

/// Parsed view of an interior cell.
#[derive(Debug)]
pub struct InteriorCell<'a> {
    pub child: u32,
    pub key: &'a [u8],
}

/// Cell bytes a page can hold, by page number (page 1 shares with the
/// database header).
pub fn usable_space(page_no: u32) -> usize {
    PAGE_SIZE - header_offset(page_no) - PAGE_HEADER_SIZE
}

fn pointer_array_start(page_no: u32) -> usize {
    header_offset(page_no) + PAGE_HEADER_SIZE
}

pub fn cell_count(data: &[u8], page_no: u32) -> Result<usize> {
    Ok(page_header(data, page_no)?.cell_count() as usize)
}

fn cell_pointer(data: &[u8], page_no: u32, idx: usize) -> Result<usize> {
    let at = pointer_array_start(page_no) + idx * CELL_POINTER_SIZE;
    let offset =
        u16::from_le_bytes(data[at..at + CELL_POINTER_SIZE].try_into().expect("2 bytes")) as usize;

    ensure_offset(offset, page_no)?;
    Ok(offset)
}

fn ensure_offset(offset: usize, page_no: u32) -> Result<()> {
    let min = pointer_array_start(page_no);
    if offset < min || offset >= PAGE_SIZE {
        return Err(kind_err(
            ErrorKind::Corrupt,
            format!("cell offset {offset} outside page body"),
        ));
    }
    Ok(())
}

/// Byte size of the cell starting at `offset`, by page flavor.
fn cell_size_at(data: &[u8], page_type: PageType, offset: usize) -> Result<usize> {
    let cell = &data[offset..];

    if page_type.is_interior() {
        if cell.len() < 4 {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("interior cell at {offset} overruns page end"),
            ));
        }
        let (key_len, n) = decode_varint(&cell[4..])?;
        return Ok(4 + n + key_len as usize);
    }

    let (key_len, n1) = decode_varint(cell)?;
    let (payload_len, n2) = decode_varint(&cell[n1..])?;
    let local = (payload_len as usize).min(MAX_LOCAL_PAYLOAD);
    let overflow_ptr = if payload_len as usize > MAX_LOCAL_PAYLOAD { 4 } else { 0 };
    Ok(n1 + n2 + key_len as usize + local + overflow_ptr)
}

/// Raw bytes of cell `idx`, suitable for copying between pages.
pub fn cell_bytes<'a>(data: &'a [u8], page_no: u32, idx: usize) -> Result<&'a [u8]> {
    let header = page_header(data, page_no)?;
    ensure!(
        idx < header.cell_count() as usize,
        "cell index {idx} out of range ({} cells)",
        header.cell_count()
    );

    let offset = cell_pointer(data, page_no, idx)?;
    let size = cell_size_at(data, header.page_type(), offset)?;
    if offset + size > PAGE_SIZE {
        return Err(kind_err(
            ErrorKind::Corrupt,
            format!("cell at {offset} overruns page end"),
        ));
    }
    Ok(&data[offset..offset + size])
}

pub fn leaf_cell<'a>(data: &'a [u8], page_no: u32, idx: usize) -> Result<LeafCell<'a>> {
    let cell = cell_bytes(data, page_no, idx)?;
    parse_leaf_cell(cell)
}

pub fn parse_leaf_cell(cell: &[u8]) -> Result<LeafCell<'_>> {
    let (key_len, n1) = decode_varint(cell)?;
    let (payload_len, n2) = decode_varint(&cell[n1..])?;
    let key_len = key_len as usize;

    let key_start = n1 + n2;
    let local_len = (payload_len as usize).min(MAX_LOCAL_PAYLOAD);
    let local_start = key_start + key_len;

    ensure!(
        local_start + local_len <= cell.len(),
        "leaf cell truncated: {} < {}",
        cell.len(),
        local_start + local_len
    );

    let overflow = if payload_len as usize > MAX_LOCAL_PAYLOAD {
        let at = local_start + local_len;
        u32::from_le_bytes(cell[at..at + 4].try_into().expect("4 bytes"))
    } else {
        0
    };

    Ok(LeafCell {
        key: &cell[key_start..key_start + key_len],
        local: &cell[local_start..local_start + local_len],
        payload_len,
        overflow,
    })
}

pub fn interior_cell<'a>(data: &'a [u8], page_no: u32, idx: usize) -> Result<InteriorCell<'a>> {
    let cell = cell_bytes(data, page_no, idx)?;
    parse_interior_cell(cell)
}

pub fn parse_interior_cell(cell: &[u8]) -> Result<InteriorCell<'_>> {
    let child = u32::from_le_bytes(cell[..4].try_into().expect("4 bytes"));
    let (key_len, n) = decode_varint(&cell[4..])?;
    let key_start = 4 + n;
    let key_len = key_len as usize;

    ensure!(
        key_start + key_len <= cell.len(),
        "interior cell truncated"
    );

    Ok(InteriorCell {
        child,
        key: &cell[key_start..key_start + key_len],
    })
}

/// The comparison key of cell `idx`, whatever the page flavor.
pub fn cell_key<'a>(data: &'a [u8], page_no: u32, idx: usize) -> Result<&'a [u8]> {
    let page_type = page_header(data, page_no)?.page_type();
    if page_type.is_interior() {
        Ok(interior_cell(data, page_no, idx)?.key)
    } else {
        Ok(leaf_cell(data, page_no, idx)?.key)
    }
}

pub fn encode_leaf_cell(key: &[u8], payload_len: u64, local: &[u8], overflow: u32) -> Vec<u8> {
    let mut cell = Vec::with_capacity(20 + key.len() + local.len());
    let mut varint = [0u8; 10];

    let n = encode_varint(key.len() as u64, &mut varint);
    cell.extend_from_slice(&varint[..n]);
    let n = encode_varint(payload_len, &mut varint);
    cell.extend_from_slice(&varint[..n]);
    cell.extend_from_slice(key);
    cell.extend_from_slice(local);
    if payload_len as usize > MAX_LOCAL_PAYLOAD {
        cell.extend_from_slice(&overflow.to_le_bytes());
    }

    cell
}

pub fn encode_interior_cell(child: u32, key: &[u8]) -> Vec<u8> {
    let mut cell = Vec::with_capacity(4 + varint_len(key.len() as u64) + key.len());
    let mut varint = [0u8; 10];

    cell.extend_from_slice(&child.to_le_bytes());
    let n = encode_varint(key.len() as u64, &mut varint);
    cell.extend_from_slice(&varint[..n]);
    cell.extend_from_slice(key);

    cell
}

/// Contiguous gap plus reclaimable fragmented bytes.
pub fn free_total(data: &[u8], page_no: u32) -> Result<usize> {
    let header = page_header(data, page_no)?;
    Ok(header.free_space() as usize + header.frag_bytes() as usize)
}

/// Bytes of usable space actually occupied (pointer array + live content).
pub fn used_bytes(data: &[u8], page_no: u32) -> Result<usize> {
    Ok(usable_space(page_no) - free_total(data, page_no)?)
}

/// Inserts `cell` at sorted position `idx`. Returns false when the page
/// cannot hold it even after defragmentation; the caller then balances.
pub fn insert_cell(data: &mut [u8], page_no: u32, idx: usize, cell: &[u8]) -> Result<bool> {
    let need = cell.len() + CELL_POINTER_SIZE;
    let header = page_header(data, page_no)?;
    let count = header.cell_count() as usize;

    ensure!(idx <= count, "insert index {idx} out of range ({count} cells)");

    if (header.free_space() as usize) < need {
        if header.free_space() as usize + (header.frag_bytes() as usize) < need {
            return Ok(false);
        }
        defragment(data, page_no)?;
    }

    let header = page_header(data, page_no)?;
    let free_start = header.free_start() as usize;
    let free_end = header.free_end() as usize;
    debug_assert!(free_end - free_start >= need);

    let content_at = free_end - cell.len();
    data[content_at..free_end].copy_from_slice(cell);

    // Shift pointers [idx..count) one slot right, then write the new one.
    let ptr_start = pointer_array_start(page_no);
    let from = ptr_start + idx * CELL_POINTER_SIZE;
    data.copy_within(from..ptr_start + count * CELL_POINTER_SIZE, from + CELL_POINTER_SIZE);
    data[from..from + CELL_POINTER_SIZE].copy_from_slice(&(content_at as u16).to_le_bytes());

    let header = page_header_mut(data, page_no)?;
    header.set_cell_count((count + 1) as u16);
    header.set_free_start((free_start + CELL_POINTER_SIZE) as u16);
    header.set_free_end(content_at as u16);
    Ok(true)
}

/// Removes cell `idx`, leaving its content as a hole (or growing the gap
/// when the content borders it).
pub fn remove_cell(data: &mut [u8], page_no: u32, idx: usize) -> Result<()> {
    let header = page_header(data, page_no)?;
    let count = header.cell_count() as usize;
    let page_type = header.page_type();
    let free_start = header.free_start() as usize;
    let free_end = header.free_end() as usize;
    let frag = header.frag_bytes() as usize;

    ensure!(idx < count, "remove index {idx} out of range ({count} cells)");

    let offset = cell_pointer(data, page_no, idx)?;
    let size = cell_size_at(data, page_type, offset)?;

    let ptr_start = pointer_array_start(page_no);
    let at = ptr_start + idx * CELL_POINTER_SIZE;
    data.copy_within(at + CELL_POINTER_SIZE..ptr_start + count * CELL_POINTER_SIZE, at);

    let header = page_header_mut(data, page_no)?;
    header.set_cell_count((count - 1) as u16);
    header.set_free_start((free_start - CELL_POINTER_SIZE) as u16);

    if offset == free_end {
        header.set_free_end((free_end + size) as u16);
    } else if frag + size <= u8::MAX as usize {
        header.set_frag_bytes((frag + size) as u8);
    } else {
        // Fragmentation counter would overflow: compact instead.
        defragment(data, page_no)?;
    }
    Ok(())
}

/// Rewrites the child pointer of interior cell `idx` in place.
pub fn set_cell_child(data: &mut [u8], page_no: u32, idx: usize, child: u32) -> Result<()> {
    let offset = {
        let header = page_header(data, page_no)?;
        ensure!(header.page_type().is_interior(), "child pointer on a leaf cell");
        ensure!(idx < header.cell_count() as usize, "cell index {idx} out of range");
        cell_pointer(data, page_no, idx)?
    };

    data[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
    Ok(())
}

/// Compacts cell content against the page end, zeroing `frag_bytes`.
pub fn defragment(data: &mut [u8], page_no: u32) -> Result<()> {
    let header = page_header(data, page_no)?;
    let count = header.cell_count() as usize;
    let page_type = header.page_type();

    let snapshot = data.to_vec();
    let ptr_start = pointer_array_start(page_no);
    let mut write_pos = PAGE_SIZE;

    for idx in 0..count {
        let at = ptr_start + idx * CELL_POINTER_SIZE;
        let offset = u16::from_le_bytes(
            snapshot[at..at + CELL_POINTER_SIZE].try_into().expect("2 bytes"),
        ) as usize;
        ensure_offset(offset, page_no)?;

        let size = cell_size_at(&snapshot, page_type, offset)?;
        write_pos -= size;
        data[write_pos..write_pos + size].copy_from_slice(&snapshot[offset..offset + size]);
        data[at..at + CELL_POINTER_SIZE].copy_from_slice(&(write_pos as u16).to_le_bytes());
    }

    let header = page_header_mut(data, page_no)?;
    header.set_free_end(write_pos as u16);
    header.set_frag_bytes(0);
    Ok(())
}

/// Position of `key` in a leaf: index of the first cell with key >= `key`,
/// plus whether it is an exact match.
pub fn find_in_leaf(data: &[u8], page_no: u32, key: &[u8]) -> Result<(usize, bool)> {
    let count = cell_count(data, page_no)?;
    let mut lo = 0;
    let mut hi = count;

    while lo < hi {
        let mid = (lo + hi) / 2;
        match key.cmp(cell_key(data, page_no, mid)?) {
            std::cmp::Ordering::Less => hi = mid,
            std::cmp::Ordering::Equal => return Ok((mid, true)),
            std::cmp::Ordering::Greater => lo = mid + 1,
        }
    }

    Ok((lo, false))
}

/// Branch to descend for `key` in an interior page: the first cell whose
/// separator exceeds `key`, or the rightmost branch (`cell_count`). A key
/// equal to a separator belongs to the right of it.
pub fn find_branch(data: &[u8], page_no: u32, key: &[u8]) -> Result<usize> {
    let count = cell_count(data, page_no)?;
    let mut lo = 0;
    let mut hi = count;

    while lo < hi {
        let mid = (lo + hi) / 2;
        if key < cell_key(data, page_no, mid)? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    Ok(lo)
}

/// Child page of branch `branch` (0..=cell_count; the last is right_child).
pub fn child_at(data: &[u8], page_no: u32, branch: usize) -> Result<u32> {
    let header = page_header(data, page_no)?;
    let count = header.cell_count() as usize;

    let child = if branch == count {
        header.right_child()
    } else {
        interior_cell(data, page_no, branch)?.child
    };

    // The root never moves, so page 1 is never anyone's child; 0 means a
    // missing pointer. Both are corruption.
    if child < 2 {
        return Err(kind_err(
            ErrorKind::Corrupt,
            format!("interior page {page_no} has invalid child {child}"),
        ));
    }
    Ok(child)
}
