//! # Database File Header
//!
//! The first 64 bytes of page 1 identify and describe the database file.
//! The root B-tree page content follows immediately within page 1.
//!
//! ## Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "JotDB format 1\0\0"
//! 16      4     Page size (little-endian u32, must equal PAGE_SIZE)
//! 20      4     Format version
//! 24      4     Page count (total pages in the file)
//! 28      4     Freelist head trunk page (0 = none)
//! 32      4     Freelist total free pages
//! 36      4     Change counter (bumped on every commit)
//! 40      1     Root page type (TableLeaf or IndexLeaf at creation)
//! 41      23    Reserved, zero
//! ```
//!
//! The header is journaled like the rest of page 1, so rollback restores
//! page counts and the freelist head together with the data they describe.
//! Rollback also relies on `page_count` here being the authoritative size:
//! journal playback truncates the file back to it.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DB_FORMAT_VERSION, DB_HEADER_SIZE, DB_MAGIC, PAGE_SIZE};
use crate::error::{kind_err, ErrorKind};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DbHeader {
    magic: [u8; 16],
    page_size: U32,
    format_version: U32,
    page_count: U32,
    freelist_head: U32,
    freelist_count: U32,
    change_counter: U32,
    root_type: u8,
    reserved: [u8; 23],
}

impl DbHeader {
    pub fn new(root_type: u8) -> Self {
        Self {
            magic: DB_MAGIC,
            page_size: U32::new(PAGE_SIZE as u32),
            format_version: U32::new(DB_FORMAT_VERSION),
            page_count: U32::new(1),
            freelist_head: U32::new(0),
            freelist_count: U32::new(0),
            change_counter: U32::new(0),
            root_type,
            reserved: [0; 23],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= DB_HEADER_SIZE,
            "buffer too small for DbHeader: {} < {}",
            data.len(),
            DB_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&data[..DB_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DbHeader: {:?}", e))?;
        header.validate()?;

        Ok(header)
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= DB_HEADER_SIZE,
            "buffer too small for DbHeader: {} < {}",
            data.len(),
            DB_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut data[..DB_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DbHeader: {:?}", e))?;
        header.validate()?;

        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != DB_MAGIC {
            return Err(kind_err(ErrorKind::Corrupt, "bad database magic"));
        }
        if self.page_size.get() as usize != PAGE_SIZE {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("unsupported page size {}", self.page_size),
            ));
        }
        if self.format_version.get() != DB_FORMAT_VERSION {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("unsupported format version {}", self.format_version),
            ));
        }
        if self.page_count.get() == 0 {
            return Err(kind_err(ErrorKind::Corrupt, "zero page count"));
        }
        Ok(())
    }

    pub fn write_to(&self, data: &mut [u8]) {
        data[..DB_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, count: u32) {
        self.page_count.set(count);
    }

    pub fn freelist_head(&self) -> u32 {
        self.freelist_head.get()
    }

    pub fn freelist_count(&self) -> u32 {
        self.freelist_count.get()
    }

    pub fn set_freelist(&mut self, head: u32, count: u32) {
        self.freelist_head.set(head);
        self.freelist_count.set(count);
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter.get()
    }

    pub fn bump_change_counter(&mut self) {
        self.change_counter
            .set(self.change_counter.get().wrapping_add(1));
    }

    pub fn root_type(&self) -> u8 {
        self.root_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageType;

    #[test]
    fn db_header_is_64_bytes() {
        assert_eq!(size_of::<DbHeader>(), DB_HEADER_SIZE);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut buf = [0u8; DB_HEADER_SIZE];
        let mut header = DbHeader::new(PageType::TableLeaf as u8);
        header.set_page_count(42);
        header.set_freelist(7, 3);
        header.bump_change_counter();
        header.write_to(&mut buf);

        let parsed = DbHeader::from_bytes(&buf).unwrap();
        assert_eq!(parsed.page_count(), 42);
        assert_eq!(parsed.freelist_head(), 7);
        assert_eq!(parsed.freelist_count(), 3);
        assert_eq!(parsed.change_counter(), 1);
        assert_eq!(parsed.root_type(), PageType::TableLeaf as u8);
    }

    #[test]
    fn header_parses_at_unaligned_offsets() {
        let mut buf = [0u8; DB_HEADER_SIZE + 1];
        let mut header = DbHeader::new(PageType::IndexLeaf as u8);
        header.set_page_count(9);
        header.write_to(&mut buf[1..]);

        let parsed = DbHeader::from_bytes(&buf[1..]).unwrap();
        assert_eq!(parsed.page_count(), 9);
        assert_eq!(parsed.root_type(), PageType::IndexLeaf as u8);

        let writable = DbHeader::from_bytes_mut(&mut buf[1..]).unwrap();
        writable.bump_change_counter();
        assert_eq!(DbHeader::from_bytes(&buf[1..]).unwrap().change_counter(), 1);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut buf = [0u8; DB_HEADER_SIZE];
        DbHeader::new(PageType::TableLeaf as u8).write_to(&mut buf);
        buf[0] ^= 0xFF;

        let err = DbHeader::from_bytes(&buf).unwrap_err();
        assert_eq!(
            crate::error::error_kind(&err),
            Some(ErrorKind::Corrupt)
        );
    }

    #[test]
    fn wrong_page_size_is_corruption() {
        let mut buf = [0u8; DB_HEADER_SIZE];
        DbHeader::new(PageType::TableLeaf as u8).write_to(&mut buf);
        buf[16..20].copy_from_slice(&8192u32.to_le_bytes());

        assert!(DbHeader::from_bytes(&buf).is_err());
    }
}
