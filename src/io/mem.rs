//! # In-Memory VFS
//!
//! Test backend holding file contents in a shared store. Two properties make
//! it the crash-testing workhorse:
//!
//! - **Shared contents**: every `MemFile` opened for a path aliases the same
//!   byte vector. Dropping a `Database` and opening a fresh one over the
//!   same `MemVfs` observes exactly what the "process" left behind, which
//!   simulates a kill-and-restart without touching disk.
//! - **Fault injection**: a file can be armed to fail after N more writes,
//!   or to fail its next sync. Commit-path failures (a mid-flush write
//!   error must force rollback, never corrupt beyond repair) are exercised
//!   this way.
//!
//! Deleting a file removes it from the store while existing handles keep
//! their `Arc`, matching POSIX unlink semantics the journal relies on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use super::{DatabaseFile, LockTable, Vfs};
use crate::error::{kind_err, ErrorKind};

#[derive(Debug, Default)]
struct FileData {
    bytes: Vec<u8>,
    fail_after_writes: Option<u64>,
    fail_next_sync: bool,
    write_count: u64,
    sync_count: u64,
}

#[derive(Default)]
struct VfsInner {
    files: HashMap<PathBuf, Arc<Mutex<FileData>>>,
    lock_tables: HashMap<PathBuf, Arc<LockTable>>,
}

#[derive(Clone, Default)]
pub struct MemVfs {
    inner: Arc<Mutex<VfsInner>>,
}

impl MemVfs {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_data(&self, path: &Path) -> Option<Arc<Mutex<FileData>>> {
        self.inner.lock().files.get(path).cloned()
    }

    /// Arms `path` to fail every write after `remaining` more succeed.
    pub fn fail_after_writes(&self, path: &Path, remaining: u64) {
        if let Some(data) = self.file_data(path) {
            data.lock().fail_after_writes = Some(remaining);
        }
    }

    /// Arms `path` so its next sync reports an I/O error.
    pub fn fail_next_sync(&self, path: &Path) {
        if let Some(data) = self.file_data(path) {
            data.lock().fail_next_sync = true;
        }
    }

    pub fn clear_faults(&self, path: &Path) {
        if let Some(data) = self.file_data(path) {
            let mut data = data.lock();
            data.fail_after_writes = None;
            data.fail_next_sync = false;
        }
    }

    pub fn write_count(&self, path: &Path) -> u64 {
        self.file_data(path).map(|d| d.lock().write_count).unwrap_or(0)
    }

    pub fn sync_count(&self, path: &Path) -> u64 {
        self.file_data(path).map(|d| d.lock().sync_count).unwrap_or(0)
    }

    /// Raw snapshot of a file's bytes, for byte-level assertions.
    pub fn snapshot(&self, path: &Path) -> Option<Vec<u8>> {
        self.file_data(path).map(|d| d.lock().bytes.clone())
    }
}

pub struct MemFile {
    data: Arc<Mutex<FileData>>,
}

impl DatabaseFile for MemFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let offset = offset as usize;

        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = data.bytes.get(offset + i).copied().unwrap_or(0);
        }

        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();

        if let Some(remaining) = data.fail_after_writes {
            if remaining == 0 {
                return Err(kind_err(ErrorKind::Io, "injected write failure"));
            }
            data.fail_after_writes = Some(remaining - 1);
        }

        let end = offset as usize + bytes.len();
        if data.bytes.len() < end {
            data.bytes.resize(end, 0);
        }
        data.bytes[offset as usize..end].copy_from_slice(bytes);
        data.write_count += 1;

        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        let mut data = self.data.lock();
        data.bytes.truncate(len as usize);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let mut data = self.data.lock();

        if data.fail_next_sync {
            data.fail_next_sync = false;
            return Err(kind_err(ErrorKind::Io, "injected sync failure"));
        }

        data.sync_count += 1;
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.lock().bytes.len() as u64)
    }
}

impl Vfs for MemVfs {
    type File = MemFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File> {
        let mut inner = self.inner.lock();

        if let Some(data) = inner.files.get(path) {
            return Ok(MemFile {
                data: Arc::clone(data),
            });
        }

        if !create {
            return Err(kind_err(
                ErrorKind::Io,
                format!("no such file: {}", path.display()),
            ));
        }

        let data = Arc::new(Mutex::new(FileData::default()));
        inner.files.insert(path.to_path_buf(), Arc::clone(&data));

        Ok(MemFile { data })
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.inner.lock().files.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.inner.lock().files.contains_key(path))
    }

    fn lock_table(&self, path: &Path) -> Arc<LockTable> {
        let mut inner = self.inner.lock();
        Arc::clone(inner.lock_tables.entry(path.to_path_buf()).or_default())
    }
}
