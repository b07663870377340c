//! # Database Connection
//!
//! [`Database`] ties the layers together behind the public API: one
//! connection owning one pager, with the key/value operations running over
//! the B-tree rooted at page 1.
//!
//! Operations outside an explicit transaction autocommit: a lone `get`
//! runs inside its own read transaction, a lone `put` or `delete` inside
//! its own write transaction committed before returning. Explicit
//! [`Database::begin_read`] / [`Database::begin_write`] group operations
//! and make the commit/rollback decision the caller's.

use std::path::Path;

use eyre::Result;

use crate::btree::{BTree, Cursor};
use crate::config::PagerOptions;
use crate::io::{DiskVfs, Vfs};
use crate::storage::Pager;
use crate::txn::TxnState;

/// A single connection to a database file. Not shareable across threads;
/// open one connection per thread and let the lock protocol coordinate.
pub struct Database<V: Vfs = DiskVfs> {
    pager: Pager<V>,
}

impl Database<DiskVfs> {
    /// Opens (creating if absent) the database file at `path` with default
    /// options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, PagerOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, opts: PagerOptions) -> Result<Self> {
        Self::open_on(DiskVfs::new(), path.as_ref(), opts)
    }
}

impl<V: Vfs> Database<V> {
    /// Opens a database through an explicit backend. Tests use this with
    /// an in-memory store; production code goes through [`Database::open`].
    pub fn open_on(vfs: V, path: &Path, opts: PagerOptions) -> Result<Self> {
        let pager = Pager::open(vfs, path, opts)?;
        Ok(Self { pager })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin_read(&mut self) -> Result<()> {
        self.pager.begin_read()
    }

    pub fn begin_write(&mut self) -> Result<()> {
        self.pager.begin_write()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.pager.rollback()
    }

    pub fn in_transaction(&self) -> bool {
        self.pager.txn_state() != TxnState::Open
    }

    /// Opens a nested savepoint inside the current write transaction.
    /// Returns a token for [`Database::release_savepoint`] /
    /// [`Database::rollback_savepoint`].
    pub fn savepoint(&mut self) -> Result<usize> {
        self.pager.savepoint()
    }

    pub fn release_savepoint(&mut self, token: usize) -> Result<()> {
        self.pager.release_savepoint(token)
    }

    pub fn rollback_savepoint(&mut self, token: usize) -> Result<()> {
        self.pager.rollback_savepoint(token)
    }

    // ------------------------------------------------------------------
    // Key/value operations
    // ------------------------------------------------------------------

    /// Looks up `key`, autocommitting a read transaction when none is open.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.in_transaction() {
            return BTree::new(&mut self.pager, 1).get(key);
        }

        self.pager.begin_read()?;
        let result = BTree::new(&mut self.pager, 1).get(key);
        self.pager.rollback()?;
        result
    }

    /// Inserts or replaces `key`, autocommitting when no write transaction
    /// is open.
    pub fn put(&mut self, key: &[u8], payload: &[u8]) -> Result<()> {
        self.write_op(|tree| tree.insert(key, payload))
    }

    /// Deletes `key`, reporting whether it existed. Autocommits when no
    /// write transaction is open.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.write_op(|tree| tree.delete(key))
    }

    fn write_op<T>(&mut self, op: impl FnOnce(&mut BTree<'_, V>) -> Result<T>) -> Result<T> {
        if self.pager.txn_state().is_writer() {
            return op(&mut BTree::new(&mut self.pager, 1));
        }
        if self.in_transaction() {
            return Err(crate::error::kind_err(
                crate::error::ErrorKind::Misuse,
                "write attempted inside a read transaction",
            ));
        }

        self.pager.begin_write()?;
        match op(&mut BTree::new(&mut self.pager, 1)) {
            Ok(v) => {
                self.pager.commit()?;
                Ok(v)
            }
            Err(e) => {
                self.pager.rollback()?;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Cursors and lower layers
    // ------------------------------------------------------------------

    /// The tree over the current transaction, for cursor traversal and
    /// batched operations. Requires an open transaction.
    pub fn tree(&mut self) -> BTree<'_, V> {
        BTree::new(&mut self.pager, 1)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new()
    }

    /// Direct pager access for callers managing pages themselves.
    pub fn pager(&mut self) -> &mut Pager<V> {
        &mut self.pager
    }
}
