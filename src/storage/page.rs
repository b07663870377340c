//! # Page Types and Header Layout
//!
//! Every 4KB page begins with a 16-byte header describing its contents.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     page_type    Type of page (TableLeaf, Overflow, ...)
//! 1       1     flags        Unused, reserved for format evolution
//! 2       2     cell_count   Number of cells in this page
//! 4       2     free_start   Offset where free space begins
//! 6       2     free_end     Offset where free space ends
//! 8       1     frag_bytes   Fragmented free bytes within the cell area
//! 9       3     reserved     Zero
//! 12      4     right_child  Rightmost child (interior) / next overflow
//!                            page (overflow) / zero (leaf, free trunk)
//! ```
//!
//! On page 1 the header sits at offset `DB_HEADER_SIZE`; the `free_*`
//! offsets are always relative to the start of the page, so page 1's
//! `free_start` begins past both headers.
//!
//! ## Page Types
//!
//! - **TableInterior** (0x01) / **TableLeaf** (0x02): rowid-keyed tree
//! - **IndexInterior** (0x03) / **IndexLeaf** (0x04): encoded-key tree
//! - **Overflow** (0x20): payload continuation chain
//! - **FreeTrunk** (0x30): free-page list trunk
//!
//! ## Cell Layout
//!
//! ```text
//! +--------------------+
//! | Header (16 bytes)  |
//! +--------------------+
//! | Cell Pointers      |  <- 2-byte offsets, sorted by key, grow down
//! +--------------------+
//! | Free Space         |
//! +--------------------+
//! | Cell Content       |  <- grows up from the end of the page
//! +--------------------+
//! ```
//!
//! The pointer array indirection lets cells be inserted and deleted in
//! sorted position without moving cell content; deleted content is counted
//! in `frag_bytes` until the page is defragmented.
//!
//! Header access goes through `zerocopy` transmutation, so reading or
//! updating a header never copies the page. Multi-byte fields use
//! little-endian byte-order types: page buffers are plain `[u8]` with no
//! alignment guarantee, so the header view must hold at any offset.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{header_offset, PAGE_HEADER_SIZE, PAGE_SIZE};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    TableInterior = 0x01,
    TableLeaf = 0x02,
    IndexInterior = 0x03,
    IndexLeaf = 0x04,
    Overflow = 0x20,
    FreeTrunk = 0x30,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::TableInterior,
            0x02 => PageType::TableLeaf,
            0x03 => PageType::IndexInterior,
            0x04 => PageType::IndexLeaf,
            0x20 => PageType::Overflow,
            0x30 => PageType::FreeTrunk,
            _ => PageType::Unknown,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::TableLeaf | PageType::IndexLeaf)
    }

    pub fn is_interior(self) -> bool {
        matches!(self, PageType::TableInterior | PageType::IndexInterior)
    }

    /// The interior counterpart of a leaf type, and vice versa.
    pub fn interior_of(self) -> PageType {
        match self {
            PageType::TableLeaf => PageType::TableInterior,
            PageType::IndexLeaf => PageType::IndexInterior,
            other => other,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    cell_count: U16,
    free_start: U16,
    free_end: U16,
    frag_bytes: u8,
    reserved: [u8; 3],
    right_child: U32,
}

impl PageHeader {
    /// Fresh header for a page whose header area begins at `base` (0 for
    /// ordinary pages, `DB_HEADER_SIZE` for page 1).
    pub fn new(page_type: PageType, base: usize) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            cell_count: U16::new(0),
            free_start: U16::new((base + PAGE_HEADER_SIZE) as u16),
            free_end: U16::new(PAGE_SIZE as u16),
            frag_bytes: 0,
            reserved: [0; 3],
            right_child: U32::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn cell_count(&self) -> u16 {
        self.cell_count.get()
    }

    pub fn set_cell_count(&mut self, count: u16) {
        self.cell_count.set(count);
    }

    pub fn free_start(&self) -> u16 {
        self.free_start.get()
    }

    pub fn set_free_start(&mut self, offset: u16) {
        self.free_start.set(offset);
    }

    pub fn free_end(&self) -> u16 {
        self.free_end.get()
    }

    pub fn set_free_end(&mut self, offset: u16) {
        self.free_end.set(offset);
    }

    /// Contiguous free bytes between the pointer array and cell content.
    pub fn free_space(&self) -> u16 {
        self.free_end.get().saturating_sub(self.free_start.get())
    }

    pub fn frag_bytes(&self) -> u8 {
        self.frag_bytes
    }

    pub fn set_frag_bytes(&mut self, bytes: u8) {
        self.frag_bytes = bytes;
    }

    pub fn add_frag_bytes(&mut self, bytes: usize) {
        self.frag_bytes = self.frag_bytes.saturating_add(bytes.min(u8::MAX as usize) as u8);
    }

    pub fn right_child(&self) -> u32 {
        self.right_child.get()
    }

    pub fn set_right_child(&mut self, page_no: u32) {
        self.right_child.set(page_no);
    }

    /// On overflow pages `right_child` links the next page of the chain.
    pub fn next_overflow(&self) -> u32 {
        self.right_child.get()
    }

    pub fn set_next_overflow(&mut self, page_no: u32) {
        self.right_child.set(page_no);
    }
}

/// Returns the page header of `page_no` within a full page buffer.
pub fn page_header(data: &[u8], page_no: u32) -> Result<&PageHeader> {
    let base = header_offset(page_no);
    PageHeader::from_bytes(&data[base..])
}

pub fn page_header_mut(data: &mut [u8], page_no: u32) -> Result<&mut PageHeader> {
    let base = header_offset(page_no);
    PageHeader::from_bytes_mut(&mut data[base..])
}

/// Structural sanity check; failures are corruption, not panics. A fully
/// zeroed page is valid (freshly allocated, never written).
pub fn validate_page(data: &[u8], page_no: u32) -> Result<()> {
    ensure!(
        data.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        data.len(),
        PAGE_SIZE
    );

    let base = header_offset(page_no);
    let header = PageHeader::from_bytes(&data[base..])?;

    let is_zeroed = header.page_type == 0
        && header.cell_count() == 0
        && header.free_start() == 0
        && header.free_end() == 0;

    if is_zeroed {
        return Ok(());
    }

    ensure!(
        header.page_type() != PageType::Unknown,
        "invalid page type: {:02x}",
        header.page_type
    );

    ensure!(
        header.free_start() as usize >= base + PAGE_HEADER_SIZE,
        "free_start {} inside header area (base {})",
        header.free_start(),
        base
    );

    ensure!(
        header.free_end() as usize <= PAGE_SIZE,
        "free_end {} > PAGE_SIZE {}",
        header.free_end(),
        PAGE_SIZE
    );

    ensure!(
        header.free_start() <= header.free_end(),
        "free_start {} > free_end {}",
        header.free_start(),
        header.free_end()
    );

    Ok(())
}
