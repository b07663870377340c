//! # Pager
//!
//! The pager owns one database file and mediates every page access: fetch
//! through the cache, dirty tracking with journal-before-write, allocation
//! and freeing, the advisory lock protocol, and the two-phase commit that
//! makes transactions atomic.
//!
//! ## Write Path Invariants
//!
//! - A page's pre-image is appended to the rollback journal before the
//!   first modification in a transaction ([`Pager::mark_dirty`]).
//! - The database file is never written until the journal covering the
//!   written pages has been synced. Cache spill under memory pressure
//!   syncs the journal first for exactly this reason.
//! - Commit order: journal sync, then dirty page flush, then database
//!   sync, then journal deletion. The journal's deletion is the commit
//!   point.
//!
//! ## Error State
//!
//! A failed write can leave the database file half-flushed. The pager then
//! enters a sticky error state: every operation fails fast with the saved
//! error kind until [`Pager::rollback`] plays the journal back and restores
//! a consistent snapshot. Rollback failures keep the journal on disk, so
//! the next open finishes the job (hot-journal recovery).
//!
//! ## Concurrency Model
//!
//! One pager is one connection and is used from one thread at a time
//! (methods take `&mut self`). Concurrency happens *between* connections,
//! through the five-level lock table their shared [`Vfs`] hands out per
//! database path. Readers of other connections are admitted until this
//! connection escalates past Reserved at commit.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr};

use crate::config::{PagerOptions, PAGE_SIZE};
use crate::error::{kind_err, ErrorKind};
use crate::io::{DatabaseFile, LockHandle, LockLevel, Vfs};
use crate::storage::cache::{PageCache, PageRef};
use crate::storage::freelist::{
    self, trunk_len, trunk_next, trunk_pop, trunk_push, Freelist, TRUNK_CAPACITY,
};
use crate::storage::header::DbHeader;
use crate::storage::page::{PageHeader, PageType};
use crate::storage::{header_offset, page_offset, DB_HEADER_SIZE};
use crate::txn::{playback_file, read_master, Journal, Savepoint, TxnState};

/// Journal path convention: the database path with `-journal` appended.
pub fn journal_path_for(db_path: &Path) -> PathBuf {
    let mut os = OsString::from(db_path.as_os_str());
    os.push("-journal");
    PathBuf::from(os)
}

pub struct Pager<V: Vfs> {
    vfs: V,
    path: PathBuf,
    journal_path: PathBuf,
    file: V::File,
    lock: LockHandle,
    cache: PageCache,
    opts: PagerOptions,

    state: TxnState,
    error: Option<ErrorKind>,
    journal: Option<Journal<V::File>>,
    /// Pages already journaled (or exempt: allocated this transaction).
    in_journal: HashSet<u32>,
    savepoints: Vec<Savepoint>,

    page_count: u32,
    freelist: Freelist,
    change_counter: u32,
    root_type: PageType,
}

impl<V: Vfs> Pager<V> {
    /// Opens (creating if absent) the database at `path`, running hot
    /// journal recovery first when a previous process died mid-write.
    pub fn open(vfs: V, path: &Path, opts: PagerOptions) -> Result<Self> {
        Self::open_with_root(vfs, path, opts, PageType::TableLeaf)
    }

    /// Like [`Pager::open`] but selecting the root tree flavor when the
    /// file is created. An existing file keeps its recorded flavor.
    pub fn open_with_root(
        vfs: V,
        path: &Path,
        opts: PagerOptions,
        root_type: PageType,
    ) -> Result<Self> {
        let journal_path = journal_path_for(path);
        let mut lock = vfs.lock_table(path).handle();

        let mut file = vfs
            .open(path, true)
            .wrap_err_with(|| format!("opening database {}", path.display()))?;

        if vfs.exists(&journal_path)? {
            lock.lock(LockLevel::Exclusive, opts.busy_timeout)
                .wrap_err("acquiring exclusive lock for journal recovery")?;
            recover(&vfs, &journal_path, &mut file)?;
            lock.unlock(LockLevel::Unlocked);
        }

        if file.len()? == 0 {
            initialize_file(&mut file, root_type)?;
        }

        let header = read_disk_header(&mut file)?;

        Ok(Self {
            vfs,
            path: path.to_path_buf(),
            journal_path,
            file,
            lock,
            cache: PageCache::new(opts.cache_pages),
            state: TxnState::Open,
            error: None,
            journal: None,
            in_journal: HashSet::new(),
            savepoints: Vec::new(),
            page_count: header.page_count(),
            freelist: Freelist::new(header.freelist_head(), header.freelist_count()),
            change_counter: header.change_counter(),
            root_type: PageType::from_byte(header.root_type()),
            opts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn freelist_count(&self) -> u32 {
        self.freelist.count()
    }

    pub fn txn_state(&self) -> TxnState {
        self.state
    }

    pub fn root_type(&self) -> PageType {
        self.root_type
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    fn check_ok(&self) -> Result<()> {
        match self.error {
            Some(kind) => Err(kind_err(kind, "pager in error state; rollback required")),
            None => Ok(()),
        }
    }

    fn enter_error(&mut self, kind: ErrorKind) {
        if self.error.is_none() {
            self.error = Some(kind);
        }
        self.state = TxnState::Error;
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    /// Begins a read transaction: shared lock, then cache revalidation
    /// against the on-disk change counter (another connection may have
    /// committed since we last looked).
    pub fn begin_read(&mut self) -> Result<()> {
        self.check_ok()?;
        if self.state != TxnState::Open {
            return Err(kind_err(ErrorKind::Misuse, "transaction already open"));
        }

        self.lock.lock(LockLevel::Shared, self.opts.busy_timeout)?;

        if let Err(e) = self.recover_if_hot() {
            self.lock.unlock(LockLevel::Unlocked);
            return Err(e);
        }

        let header = match read_disk_header(&mut self.file) {
            Ok(h) => h,
            Err(e) => {
                self.lock.unlock(LockLevel::Unlocked);
                return Err(e);
            }
        };

        if header.change_counter() != self.change_counter {
            self.cache.clear();
            self.change_counter = header.change_counter();
        }
        self.page_count = header.page_count();
        self.freelist = Freelist::new(header.freelist_head(), header.freelist_count());

        self.state = TxnState::Reader;
        Ok(())
    }

    /// Detects and replays a journal left behind by a crashed writer.
    /// Runs at every read transaction start, not just at open: a
    /// long-lived connection must notice a journal another process
    /// abandoned after we opened. A journal whose owner still holds
    /// Reserved belongs to a live write transaction and is left alone.
    ///
    /// Caller holds Shared; the lock is back at Shared on return.
    fn recover_if_hot(&mut self) -> Result<()> {
        if !self.vfs.exists(&self.journal_path)? {
            return Ok(());
        }

        // Try Reserved without blocking to tell a hot journal from a
        // live writer's working journal.
        if self
            .lock
            .lock(LockLevel::Reserved, Duration::ZERO)
            .is_err()
        {
            return Ok(());
        }

        let result = self.playback_hot_journal();
        self.lock.unlock(LockLevel::Shared);
        result
    }

    fn playback_hot_journal(&mut self) -> Result<()> {
        // The owner may have committed, deleting the journal, between
        // the existence check and the Reserved attempt.
        if !self.vfs.exists(&self.journal_path)? {
            return Ok(());
        }

        self.lock
            .lock(LockLevel::Exclusive, self.opts.busy_timeout)
            .wrap_err("acquiring exclusive lock for journal recovery")?;
        recover(&self.vfs, &self.journal_path, &mut self.file)?;

        // Cached pages may predate the restored pre-images, and the
        // rolled-back change counter will not flag them as stale.
        self.cache.clear();
        Ok(())
    }

    /// Begins a write transaction: reserved lock and a fresh journal with
    /// the header placeholder written. Only one connection may hold
    /// Reserved; contention surfaces as a retryable busy error.
    pub fn begin_write(&mut self) -> Result<()> {
        self.check_ok()?;

        let auto_read = self.state == TxnState::Open;
        if auto_read {
            self.begin_read()?;
        } else if self.state != TxnState::Reader {
            return Err(kind_err(ErrorKind::Misuse, "write transaction already open"));
        }

        if let Err(e) = self.lock.lock(LockLevel::Reserved, self.opts.busy_timeout) {
            if auto_read {
                self.lock.unlock(LockLevel::Unlocked);
                self.state = TxnState::Open;
            }
            return Err(e);
        }

        let journal_file = self.vfs.open(&self.journal_path, true)?;
        self.journal = Some(Journal::create(journal_file, self.page_count)?);
        self.in_journal.clear();
        self.state = TxnState::WriterLocked;
        Ok(())
    }

    /// First commit phase: write header bookkeeping (page count, freelist,
    /// change counter) into page 1, record the optional master journal
    /// path, and sync the journal. After this returns the transaction can
    /// survive a crash in either direction: replay rolls it back, phase
    /// two completes it.
    pub fn commit_phase_one(&mut self, master: Option<&Path>) -> Result<()> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(ErrorKind::Misuse, "no write transaction to commit"));
        }

        if self.state == TxnState::WriterLocked && master.is_none() {
            // Nothing dirtied: nothing to make durable.
            return Ok(());
        }

        self.write_header_updates()?;

        let journal = self.journal.as_mut().ok_or_else(|| {
            kind_err(ErrorKind::Misuse, "write transaction has no journal")
        })?;
        if let Some(path) = master {
            journal.write_master(path)?;
        }
        journal.sync()?;
        self.cache.clear_needs_sync();

        Ok(())
    }

    /// Second commit phase: exclusive lock, flush dirty pages, sync the
    /// database, delete the journal, release locks. A busy error here
    /// leaves the transaction intact and retryable.
    pub fn commit_phase_two(&mut self) -> Result<()> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(ErrorKind::Misuse, "no write transaction to commit"));
        }

        if self.state == TxnState::WriterLocked {
            return self.end_write(TxnState::Open);
        }

        self.lock.lock(LockLevel::Exclusive, self.opts.busy_timeout)?;

        for slot in self.cache.dirty_pages() {
            debug_assert!(!slot.needs_sync(), "dirty page flushed before journal sync");
            let data = slot.read();
            if let Err(e) = self.file.write_at(page_offset(slot.page_no()), &data[..]) {
                drop(data);
                self.enter_error(ErrorKind::Io);
                return Err(e.wrap_err("flushing dirty pages at commit"));
            }
            drop(data);
            slot.clear_dirty();
        }

        self.state = TxnState::WriterFinished;

        if let Err(e) = self.file.sync() {
            self.enter_error(ErrorKind::Io);
            return Err(e.wrap_err("syncing database at commit"));
        }

        self.end_write(TxnState::Open)
    }

    /// Single-file commit: both phases back to back.
    pub fn commit(&mut self) -> Result<()> {
        self.commit_phase_one(None)?;
        self.commit_phase_two()
    }

    /// Drops the journal and all transaction bookkeeping, releasing locks.
    /// The commit point: deleting the journal makes the flushed state the
    /// one and only state.
    fn end_write(&mut self, next: TxnState) -> Result<()> {
        self.journal = None;
        if self.vfs.exists(&self.journal_path)? {
            if let Err(e) = self.vfs.delete(&self.journal_path) {
                // The journal would roll the transaction back on the next
                // open; surface that instead of claiming durability.
                self.enter_error(ErrorKind::Io);
                return Err(e.wrap_err("deleting journal at commit"));
            }
        }

        self.in_journal.clear();
        self.savepoints.clear();
        self.lock.unlock(LockLevel::Unlocked);
        self.state = next;
        Ok(())
    }

    /// Aborts the current transaction. For writers this plays the journal
    /// back over the database file, restoring the pre-transaction bytes,
    /// and clears any sticky error state. Safe to call in any state.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TxnState::Open => return Ok(()),
            TxnState::Reader => {
                self.lock.unlock(LockLevel::Unlocked);
                self.state = TxnState::Open;
                return Ok(());
            }
            _ => {}
        }

        if let Some(journal) = self.journal.as_mut() {
            // Publish the record count so playback honors every record.
            if let Err(e) = journal.sync() {
                self.enter_error(ErrorKind::Io);
                return Err(e.wrap_err("syncing journal for rollback"));
            }
            if let Err(e) = journal.playback(&mut self.file) {
                // Journal stays on disk; recovery at next open retries.
                self.enter_error(ErrorKind::Io);
                return Err(e.wrap_err("journal playback during rollback"));
            }
        }

        self.journal = None;
        if self.vfs.exists(&self.journal_path)? {
            self.vfs.delete(&self.journal_path)?;
        }

        // Cached pages may hold post-images of the aborted transaction.
        self.cache.clear();

        let header = read_disk_header(&mut self.file)?;
        self.page_count = header.page_count();
        self.freelist = Freelist::new(header.freelist_head(), header.freelist_count());
        self.change_counter = header.change_counter();

        self.in_journal.clear();
        self.savepoints.clear();
        self.error = None;
        self.lock.unlock(LockLevel::Unlocked);
        self.state = TxnState::Open;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Page access
    // ------------------------------------------------------------------

    /// Fetches page `page_no`, from cache or disk. The returned reference
    /// pins the page until dropped. Pages are raw byte containers here;
    /// interpreting (and rejecting malformed) content is the tree layer's
    /// job, since freelist trunks and overflow pages carry no node header.
    pub fn fetch(&mut self, page_no: u32) -> Result<PageRef> {
        self.check_ok()?;
        if !self.state.can_read() {
            return Err(kind_err(ErrorKind::Misuse, "no open transaction"));
        }
        if page_no < 1 || page_no > self.page_count {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("page {page_no} out of range (1..={})", self.page_count),
            ));
        }

        if let Some(slot) = self.cache.get(page_no) {
            return Ok(slot);
        }

        self.make_room()?;

        let file = &mut self.file;
        self.cache.insert(page_no, |buf| {
            file.read_at(page_offset(page_no), buf)
                .wrap_err_with(|| format!("reading page {page_no}"))
        })
    }

    /// Evicts until the cache has a free slot, spilling dirty victims to
    /// the database file (journal synced first).
    fn make_room(&mut self) -> Result<()> {
        while self.cache.is_full() {
            let Some(victim) = self.cache.pop_victim() else {
                return Err(kind_err(
                    ErrorKind::NoMem,
                    format!("page cache full ({} pages, all pinned)", self.cache.capacity()),
                ));
            };
            if victim.is_dirty() {
                self.spill(&victim)?;
            }
        }
        Ok(())
    }

    /// Writes one evicted dirty page to the database file. The journal is
    /// synced first when the page's pre-image is not yet durable; skipping
    /// that would let a crash leave an unjournaled overwrite.
    fn spill(&mut self, slot: &PageRef) -> Result<()> {
        if slot.needs_sync() {
            let journal = self.journal.as_mut().ok_or_else(|| {
                kind_err(ErrorKind::Misuse, "dirty page outside a write transaction")
            })?;
            if let Err(e) = journal.sync() {
                self.enter_error(ErrorKind::Io);
                return Err(e.wrap_err("syncing journal before cache spill"));
            }
            self.cache.clear_needs_sync();
            slot.set_needs_sync(false);
        }

        let data = slot.read();
        if let Err(e) = self.file.write_at(page_offset(slot.page_no()), &data[..]) {
            self.enter_error(ErrorKind::Io);
            return Err(e.wrap_err(format!("spilling page {}", slot.page_no())));
        }
        drop(data);

        slot.clear_dirty();
        if self.state == TxnState::WriterCacheMod {
            self.state = TxnState::WriterDbMod;
        }
        Ok(())
    }

    /// Declares intent to modify `page`. On the first modification in the
    /// transaction the pre-image goes to the journal (pages allocated this
    /// transaction are exempt: rollback truncates them away). Must be
    /// called before bytes change, while the page still holds its
    /// pre-image.
    pub fn mark_dirty(&mut self, page: &PageRef) -> Result<()> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(
                ErrorKind::Misuse,
                "page modification requires a write transaction",
            ));
        }

        let page_no = page.page_no();

        if self.in_journal.insert(page_no) {
            let journal = self.journal.as_mut().ok_or_else(|| {
                kind_err(ErrorKind::Misuse, "write transaction has no journal")
            })?;
            if page_no <= journal.orig_page_count() {
                let data = page.read();
                journal
                    .append(page_no, &data[..])
                    .wrap_err_with(|| format!("journaling pre-image of page {page_no}"))?;
                drop(data);
                page.set_needs_sync(true);
            }
        }

        if let Some(sp) = self.savepoints.last_mut() {
            if page_no <= sp.page_count && !sp.captured.contains(&page_no) {
                let mut image = Box::new([0u8; PAGE_SIZE]);
                image.copy_from_slice(&page.read()[..]);
                sp.preimages.insert(page_no, image);
                sp.captured.insert(page_no);
            }
        }

        page.mark_dirty();
        if self.state == TxnState::WriterLocked {
            self.state = TxnState::WriterCacheMod;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates a page: from the freelist when possible, otherwise by
    /// growing the file. The page comes back zeroed, dirty, and journaled
    /// as needed; the caller formats it.
    pub fn allocate_page(&mut self) -> Result<PageRef> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(
                ErrorKind::Misuse,
                "page allocation requires a write transaction",
            ));
        }

        if !self.freelist.is_empty() {
            return self.allocate_from_freelist();
        }

        if self.page_count == u32::MAX {
            return Err(kind_err(ErrorKind::Full, "database file is full"));
        }

        let page_no = self.page_count + 1;
        self.page_count = page_no;

        let page = self.fetch(page_no)?;
        self.mark_dirty(&page)?;
        Ok(page)
    }

    fn allocate_from_freelist(&mut self) -> Result<PageRef> {
        let head = self.freelist.head();
        if head > self.page_count {
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("freelist head {head} beyond page count {}", self.page_count),
            ));
        }

        let trunk = self.fetch(head)?;

        let entries = trunk_len(&trunk.read()[..]);
        if entries == 0 {
            // Empty trunk: hand the trunk page itself out.
            let next = trunk_next(&trunk.read()[..]);
            self.mark_dirty(&trunk)?;
            trunk.write().fill(0);

            self.freelist = Freelist::new(next, self.freelist.count().saturating_sub(1));
            return Ok(trunk);
        }

        self.mark_dirty(&trunk)?;
        let page_no = trunk_pop(&mut trunk.write()[..]);
        drop(trunk);
        self.freelist = Freelist::new(head, self.freelist.count().saturating_sub(1));

        if page_no < 2 || page_no > self.page_count {
            self.enter_error(ErrorKind::Corrupt);
            return Err(kind_err(
                ErrorKind::Corrupt,
                format!("freelist entry {page_no} out of range"),
            ));
        }

        let page = self.fetch(page_no)?;
        self.mark_dirty(&page)?;
        page.write().fill(0);
        Ok(page)
    }

    /// Returns `page_no` to the freelist for reuse. The page's content is
    /// left in place on disk; only trunk bookkeeping changes (and is
    /// journaled like any other modification).
    pub fn free_page(&mut self, page_no: u32) -> Result<()> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(
                ErrorKind::Misuse,
                "freeing a page requires a write transaction",
            ));
        }
        if page_no < 2 || page_no > self.page_count {
            return Err(kind_err(
                ErrorKind::Misuse,
                format!("page {page_no} cannot be freed"),
            ));
        }

        let head = self.freelist.head();

        if head == 0 {
            let page = self.fetch(page_no)?;
            self.mark_dirty(&page)?;
            freelist::init_trunk(&mut page.write()[..], 0);
            self.freelist = Freelist::new(page_no, self.freelist.count() + 1);
            return Ok(());
        }

        let trunk = self.fetch(head)?;
        if trunk_len(&trunk.read()[..]) < TRUNK_CAPACITY {
            self.mark_dirty(&trunk)?;
            trunk_push(&mut trunk.write()[..], page_no);
            self.freelist = Freelist::new(head, self.freelist.count() + 1);
            return Ok(());
        }
        drop(trunk);

        // Head trunk full: the freed page becomes the new head trunk.
        let page = self.fetch(page_no)?;
        self.mark_dirty(&page)?;
        freelist::init_trunk(&mut page.write()[..], head);
        self.freelist = Freelist::new(page_no, self.freelist.count() + 1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Savepoints
    // ------------------------------------------------------------------

    /// Opens a savepoint inside the current write transaction and returns
    /// its index for later release or rollback.
    pub fn savepoint(&mut self) -> Result<usize> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(
                ErrorKind::Misuse,
                "savepoints require a write transaction",
            ));
        }

        self.savepoints.push(Savepoint::new(
            self.page_count,
            self.freelist.head(),
            self.freelist.count(),
        ));
        Ok(self.savepoints.len() - 1)
    }

    /// Releases savepoint `index` and everything nested inside it, folding
    /// its changes into the enclosing scope. Pre-images migrate outward so
    /// a later rollback of the enclosing savepoint still restores them.
    pub fn release_savepoint(&mut self, index: usize) -> Result<()> {
        self.check_ok()?;
        if index >= self.savepoints.len() {
            return Err(kind_err(ErrorKind::Misuse, "no such savepoint"));
        }

        let released = self.savepoints.split_off(index);
        if let Some(outer) = self.savepoints.last_mut() {
            // Oldest first, so the earliest pre-image of each page wins.
            for sp in released {
                for (page_no, image) in sp.preimages {
                    if outer.captured.insert(page_no) {
                        outer.preimages.insert(page_no, image);
                    }
                }
            }
        }
        Ok(())
    }

    /// Rolls back to savepoint `index`: cached pages regain their images
    /// from the savepoint stack (newest scope first), allocation
    /// bookkeeping rewinds, and the savepoint itself stays open with a
    /// clean slate. The journal is untouched; it keeps transaction-start
    /// images for a full rollback.
    pub fn rollback_savepoint(&mut self, index: usize) -> Result<()> {
        self.check_ok()?;
        if !self.state.is_writer() {
            return Err(kind_err(
                ErrorKind::Misuse,
                "savepoints require a write transaction",
            ));
        }
        if index >= self.savepoints.len() {
            return Err(kind_err(ErrorKind::Misuse, "no such savepoint"));
        }

        let mut tail = self.savepoints.split_off(index);

        for sp in tail.iter().rev() {
            for (&page_no, image) in &sp.preimages {
                self.restore_page(page_no, image)?;
            }
        }

        let mut base = tail.swap_remove(0);

        for page_no in base.page_count + 1..=self.page_count {
            self.cache.discard(page_no);
            self.in_journal.remove(&page_no);
        }
        self.page_count = base.page_count;
        self.freelist = Freelist::new(base.freelist_head, base.freelist_count);

        base.preimages.clear();
        base.captured.clear();
        self.savepoints.push(base);
        Ok(())
    }

    /// Puts a savepoint pre-image back into the cache as a dirty page. The
    /// page was journaled when first dirtied, so flushing the restored
    /// image at commit stays within the journal-before-write rule.
    fn restore_page(&mut self, page_no: u32, image: &[u8; PAGE_SIZE]) -> Result<()> {
        let synced = self.journal.as_ref().is_some_and(|j| j.is_synced());

        let slot = match self.cache.get(page_no) {
            Some(slot) => {
                slot.write().copy_from_slice(image);
                slot
            }
            None => {
                self.make_room()?;
                self.cache.insert(page_no, |buf| {
                    buf.copy_from_slice(image);
                    Ok(())
                })?
            }
        };

        slot.mark_dirty();
        slot.set_needs_sync(!synced);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Header maintenance
    // ------------------------------------------------------------------

    /// Writes the in-memory allocation bookkeeping into page 1's database
    /// header and bumps the change counter. Runs in commit phase one so
    /// the header's pre-image lands in the journal before it is synced.
    fn write_header_updates(&mut self) -> Result<()> {
        let page1 = self.fetch(1)?;
        self.mark_dirty(&page1)?;

        let mut data = page1.write();
        let header = DbHeader::from_bytes_mut(&mut data[..])
            .wrap_err("database header on page 1")?;
        header.set_page_count(self.page_count);
        header.set_freelist(self.freelist.head(), self.freelist.count());
        header.bump_change_counter();
        self.change_counter = header.change_counter();
        Ok(())
    }
}

/// Formats a brand new database file: page 1 with the database header and
/// an empty root page of the requested flavor.
fn initialize_file(file: &mut impl DatabaseFile, root_type: PageType) -> Result<()> {
    let mut page = vec![0u8; PAGE_SIZE];

    DbHeader::new(root_type as u8).write_to(&mut page);
    let header = PageHeader::new(root_type, DB_HEADER_SIZE);
    page[header_offset(1)..header_offset(1) + size_of::<PageHeader>()]
        .copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));

    file.write_at(0, &page).wrap_err("initializing database file")?;
    file.sync().wrap_err("syncing new database file")
}

fn read_disk_header(file: &mut impl DatabaseFile) -> Result<DbHeader> {
    let mut buf = [0u8; DB_HEADER_SIZE];
    file.read_at(0, &mut buf).wrap_err("reading database header")?;
    Ok(*DbHeader::from_bytes(&buf)?)
}

/// Hot journal playback. A master-journal record flips the
/// decision: when the master file is gone, the multi-file commit completed
/// and the journal is stale; when it survives, the commit did not finish
/// anywhere and this database rolls back too.
fn recover<V: Vfs>(vfs: &V, journal_path: &Path, db: &mut V::File) -> Result<()> {
    let mut journal = vfs.open(journal_path, false)?;

    if let Some(master) = read_master(&mut journal)? {
        if !vfs.exists(&master)? {
            drop(journal);
            vfs.delete(journal_path)?;
            return Ok(());
        }
    }

    playback_file(&mut journal, db).wrap_err("hot journal playback")?;
    drop(journal);
    vfs.delete(journal_path)?;
    Ok(())
}
