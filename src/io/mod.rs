//! # File Abstraction Layer
//!
//! This module provides the byte-addressable file interface the pager and
//! journal are written against, plus the two backends that implement it.
//!
//! ## Design
//!
//! The interface is copy-based: callers hand in buffers and the backend
//! reads or writes at explicit byte offsets. A rollback-journal engine needs
//! precise control over write ordering (pre-image to the journal, sync,
//! only then the database page), so the backend never buffers writes in a
//! way `sync` does not flush.
//!
//! ```text
//! fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
//! fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
//! ```
//!
//! Reads past end-of-file zero-fill the remainder of the buffer. The pager
//! relies on this when fetching a freshly allocated page that has never
//! been written.
//!
//! ## Backends
//!
//! | Backend   | Use                                             |
//! |-----------|-------------------------------------------------|
//! | `DiskVfs` | production, `std::fs` files                     |
//! | `MemVfs`  | tests: shared in-memory store, fault injection, |
//! |           | crash simulation by reopening the same store    |
//!
//! ## Locking
//!
//! Each database path has one [`lock::LockTable`] implementing the
//! five-level advisory protocol (Unlocked → Shared → Reserved →
//! Pending → Exclusive). The table is shared by every connection the same
//! `Vfs` hands out for that path, which is the coordination scope of this
//! engine: one lock table per database file.

pub mod lock;
pub mod mem;

pub use lock::{LockHandle, LockLevel, LockTable};
pub use mem::MemVfs;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use parking_lot::Mutex;

use crate::error::{kind_err, ErrorKind};

/// Byte-addressable file handle consumed by the pager and journal.
pub trait DatabaseFile: Send {
    /// Reads `buf.len()` bytes at `offset`, zero-filling anything past EOF.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `data` at `offset`, extending the file as needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    fn truncate(&mut self, len: u64) -> Result<()>;

    /// Flushes buffered writes to durable storage.
    fn sync(&mut self) -> Result<()>;

    fn len(&mut self) -> Result<u64>;
}

/// Factory for [`DatabaseFile`] handles plus the per-path lock table.
pub trait Vfs: Clone + Send {
    type File: DatabaseFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File>;

    fn delete(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool>;

    /// The advisory lock table coordinating access to `path`. Every call
    /// with the same path returns the same table.
    fn lock_table(&self, path: &Path) -> Arc<LockTable>;
}

/// Production backend over `std::fs`.
#[derive(Clone, Default)]
pub struct DiskVfs {
    lock_tables: Arc<Mutex<std::collections::HashMap<PathBuf, Arc<LockTable>>>>,
}

impl DiskVfs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vfs for DiskVfs {
    type File = DiskFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)
            .map_err(|e| {
                kind_err(ErrorKind::Io, format!("failed to open {}: {e}", path.display()))
            })?;

        Ok(DiskFile { file })
    }

    fn delete(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| {
            kind_err(ErrorKind::Io, format!("failed to delete {}: {e}", path.display()))
        })
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn lock_table(&self, path: &Path) -> Arc<LockTable> {
        let mut tables = self.lock_tables.lock();
        Arc::clone(tables.entry(path.to_path_buf()).or_default())
    }
}

pub struct DiskFile {
    file: File,
}

impl DatabaseFile for DiskFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let file_len = self
            .file
            .metadata()
            .map_err(|e| kind_err(ErrorKind::Io, format!("stat failed: {e}")))?
            .len();

        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| kind_err(ErrorKind::Io, format!("seek to {offset} failed: {e}")))?;

        let available = ((file_len - offset) as usize).min(buf.len());
        self.file
            .read_exact(&mut buf[..available])
            .map_err(|e| kind_err(ErrorKind::Io, format!("read at {offset} failed: {e}")))?;
        buf[available..].fill(0);

        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| kind_err(ErrorKind::Io, format!("seek to {offset} failed: {e}")))?;
        self.file
            .write_all(data)
            .map_err(|e| kind_err(ErrorKind::Io, format!("write at {offset} failed: {e}")))
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|e| kind_err(ErrorKind::Io, format!("truncate to {len} failed: {e}")))
    }

    fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| kind_err(ErrorKind::Io, format!("sync failed: {e}")))
    }

    fn len(&mut self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| kind_err(ErrorKind::Io, format!("stat failed: {e}")))
            .wrap_err("file length query")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_file_read_past_eof_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = DiskVfs::new();
        let path = dir.path().join("t.db");

        let mut file = vfs.open(&path, true).unwrap();
        file.write_at(0, b"hello").unwrap();

        let mut buf = [0xFFu8; 8];
        file.read_at(2, &mut buf).unwrap();

        assert_eq!(&buf[..3], b"llo");
        assert_eq!(&buf[3..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn disk_file_write_extends_and_len_reports() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = DiskVfs::new();
        let path = dir.path().join("t.db");

        let mut file = vfs.open(&path, true).unwrap();
        file.write_at(100, &[7u8; 4]).unwrap();

        assert_eq!(file.len().unwrap(), 104);

        file.truncate(50).unwrap();
        assert_eq!(file.len().unwrap(), 50);
    }

    #[test]
    fn disk_vfs_lock_table_is_shared_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = DiskVfs::new();
        let path = dir.path().join("t.db");

        let a = vfs.lock_table(&path);
        let b = vfs.lock_table(&path);

        assert!(Arc::ptr_eq(&a, &b));
    }
}
