//! # SIEVE Page Cache
//!
//! In-memory cache of database pages with reference counting, dirty
//! tracking and SIEVE eviction.
//!
//! ## Why SIEVE Instead of LRU?
//!
//! A sequential B-tree scan touches every leaf exactly once; under LRU
//! those one-shot pages push out the interior pages every lookup needs.
//! SIEVE keeps a `visited` flag per entry and sweeps with a hand pointer:
//!
//! - On access: set `visited`
//! - On eviction: if `visited`, clear it and advance (second chance);
//!   otherwise evict this entry
//!
//! ## Reference Counting
//!
//! A cached page is handed out as [`PageRef`] — an `Arc<PageSlot>`. The
//! cache holds one reference itself, so a page is "pinned" exactly while
//! some caller still holds a clone (`Arc::strong_count > 1`), and dropping
//! the last outside reference is the release operation. Pinned entries are
//! never evicted, so a held `PageRef` always aliases live cache state.
//!
//! Page contents sit behind a `parking_lot::RwLock` inside the slot;
//! callers take short read/write guards around actual byte access. The
//! cache-wide index is guarded by its own mutex and is private to one
//! connection; connections never share cached pages.
//!
//! ## Dirty Pages and Spill
//!
//! Each slot carries two flags the pager maintains:
//!
//! - `dirty`: modified since last flush to the database file
//! - `needs_sync`: its journal pre-image has not been synced to disk yet
//!
//! The cache itself never performs I/O. Eviction surfaces a victim to the
//! pager via [`PageCache::pop_victim`]; the pager journals/syncs/flushes
//! as required before letting the slot drop ("cache spill" never bypasses
//! the journal-before-write rule).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::PAGE_SIZE;
use crate::error::{kind_err, ErrorKind};

/// One cached page. Handed out as `Arc<PageSlot>`; the strong count is the
/// page's reference count.
pub struct PageSlot {
    page_no: u32,
    dirty: AtomicBool,
    needs_sync: AtomicBool,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl PageSlot {
    fn new(page_no: u32) -> Self {
        Self {
            page_no,
            dirty: AtomicBool::new(false),
            needs_sync: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Mutable access to the page bytes. The pager must have journaled the
    /// pre-image (`Pager::mark_dirty`) before the first write in a
    /// transaction.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn needs_sync(&self) -> bool {
        self.needs_sync.load(Ordering::Acquire)
    }

    pub fn set_needs_sync(&self, value: bool) {
        self.needs_sync.store(value, Ordering::Release);
    }
}

impl fmt::Debug for PageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The 4KB buffer stays out of the output.
        f.debug_struct("PageSlot")
            .field("page_no", &self.page_no)
            .field("dirty", &self.is_dirty())
            .field("needs_sync", &self.needs_sync())
            .finish_non_exhaustive()
    }
}

/// Pinned, shared reference to a cached page.
pub type PageRef = Arc<PageSlot>;

struct CacheEntry {
    slot: PageRef,
    visited: bool,
}

impl CacheEntry {
    fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.slot) > 1
    }
}

#[derive(Default)]
struct CacheInner {
    entries: Vec<CacheEntry>,
    index: HashMap<u32, usize>,
    hand: usize,
}

impl CacheInner {
    fn remove(&mut self, idx: usize) -> CacheEntry {
        let entry = self.entries.swap_remove(idx);
        self.index.remove(&entry.slot.page_no);

        if idx < self.entries.len() {
            let moved = self.entries[idx].slot.page_no;
            self.index.insert(moved, idx);
        }

        if self.hand >= self.entries.len() {
            self.hand = 0;
        }

        entry
    }
}

pub struct PageCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn get(&self, page_no: u32) -> Option<PageRef> {
        let mut inner = self.inner.lock();

        let idx = *inner.index.get(&page_no)?;
        let entry = &mut inner.entries[idx];
        entry.visited = true;
        Some(Arc::clone(&entry.slot))
    }

    /// Inserts a page loaded by `init`. The caller is responsible for
    /// having made room first; a full cache is an out-of-memory condition
    /// here, reported without disturbing resident entries.
    pub fn insert<I>(&self, page_no: u32, init: I) -> Result<PageRef>
    where
        I: FnOnce(&mut [u8]) -> Result<()>,
    {
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.index.get(&page_no) {
            let entry = &mut inner.entries[idx];
            entry.visited = true;
            return Ok(Arc::clone(&entry.slot));
        }

        if inner.entries.len() >= self.capacity {
            return Err(kind_err(
                ErrorKind::NoMem,
                format!("page cache full ({} pages, all pinned)", self.capacity),
            ));
        }

        let slot = Arc::new(PageSlot::new(page_no));
        init(slot.write().as_mut_slice())?;

        let idx = inner.entries.len();
        inner.entries.push(CacheEntry {
            slot: Arc::clone(&slot),
            // Born unvisited: one sweep must still tell touched pages
            // from pages loaded once and never looked at again.
            visited: false,
        });
        inner.index.insert(page_no, idx);

        Ok(slot)
    }

    /// Removes and returns an eviction victim chosen by the SIEVE sweep,
    /// or None when every entry is pinned. The caller inspects the dirty
    /// flag and spills before dropping the returned reference.
    pub fn pop_victim(&self) -> Option<PageRef> {
        let mut inner = self.inner.lock();

        if inner.entries.is_empty() {
            return None;
        }

        // Two full sweeps: the first may only clear visited flags.
        for _ in 0..2 * inner.entries.len() {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % inner.entries.len();

            let entry = &mut inner.entries[idx];
            if entry.is_pinned() {
                continue;
            }
            if entry.visited {
                entry.visited = false;
                continue;
            }

            return Some(inner.remove(idx).slot);
        }

        None
    }

    /// Drops an unpinned entry outright (page freed, or stale after
    /// rollback). Pinned entries are left alone.
    pub fn discard(&self, page_no: u32) {
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.index.get(&page_no) {
            if !inner.entries[idx].is_pinned() {
                inner.remove(idx);
            }
        }
    }

    /// Dirty pages in ascending page order, so commit writes the database
    /// file sequentially.
    pub fn dirty_pages(&self) -> Vec<PageRef> {
        let inner = self.inner.lock();

        let mut dirty: Vec<PageRef> = inner
            .entries
            .iter()
            .filter(|e| e.slot.is_dirty())
            .map(|e| Arc::clone(&e.slot))
            .collect();
        dirty.sort_unstable_by_key(|slot| slot.page_no);
        dirty
    }

    pub fn dirty_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.slot.is_dirty())
            .count()
    }

    /// Journal has been synced: no cached page needs a journal sync before
    /// it may be spilled.
    pub fn clear_needs_sync(&self) {
        let inner = self.inner.lock();
        for entry in &inner.entries {
            entry.slot.set_needs_sync(false);
        }
    }

    /// Empties the cache. Used on rollback, when cached contents may be
    /// post-images of an aborted transaction; outstanding references keep
    /// their buffers alive but detached, and their owners (cursors of the
    /// dead transaction) are invalid by contract.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.index.clear();
        inner.hand = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed(_: &mut [u8]) -> Result<()> {
        Ok(())
    }

    #[test]
    fn insert_then_get_returns_same_slot() {
        let cache = PageCache::new(8);

        let a = cache
            .insert(3, |data| {
                data[0] = 42;
                Ok(())
            })
            .unwrap();
        let b = cache.get(3).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.read()[0], 42);
    }

    #[test]
    fn insert_existing_page_is_a_hit_not_a_reload() {
        let cache = PageCache::new(8);

        let a = cache
            .insert(3, |data| {
                data[0] = 1;
                Ok(())
            })
            .unwrap();
        let b = cache
            .insert(3, |_| panic!("init must not run on a cache hit"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn full_cache_reports_nomem_without_evicting() {
        let cache = PageCache::new(1);

        let _held = cache.insert(1, zeroed).unwrap();
        let err = cache.insert(2, zeroed).unwrap_err();

        assert_eq!(crate::error::error_kind(&err), Some(ErrorKind::NoMem));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn pop_victim_skips_pinned_entries() {
        let cache = PageCache::new(4);

        let held = cache.insert(1, zeroed).unwrap();
        drop(cache.insert(2, zeroed).unwrap());

        // Page 2 is unpinned and unvisited; page 1 is pinned by `held`.
        let victim = cache.pop_victim().unwrap();
        assert_eq!(victim.page_no(), 2);

        assert!(cache.pop_victim().is_none());
        drop(held);
        assert_eq!(cache.pop_victim().unwrap().page_no(), 1);
    }

    #[test]
    fn sieve_gives_visited_entries_a_second_chance() {
        let cache = PageCache::new(4);

        drop(cache.insert(1, zeroed).unwrap());
        drop(cache.insert(2, zeroed).unwrap());

        // Touch page 1 again; page 2 should fall first.
        drop(cache.get(1).unwrap());

        let victim = cache.pop_victim().unwrap();
        assert_eq!(victim.page_no(), 2);
    }

    #[test]
    fn dirty_pages_come_out_in_page_order() {
        let cache = PageCache::new(8);

        for page_no in [5u32, 2, 9] {
            let slot = cache.insert(page_no, zeroed).unwrap();
            slot.mark_dirty();
        }

        let order: Vec<u32> = cache.dirty_pages().iter().map(|s| s.page_no()).collect();
        assert_eq!(order, vec![2, 5, 9]);
    }

    #[test]
    fn clear_needs_sync_touches_every_entry() {
        let cache = PageCache::new(8);

        let a = cache.insert(1, zeroed).unwrap();
        let b = cache.insert(2, zeroed).unwrap();
        a.set_needs_sync(true);
        b.set_needs_sync(true);

        cache.clear_needs_sync();

        assert!(!a.needs_sync());
        assert!(!b.needs_sync());
    }

    #[test]
    fn discard_leaves_pinned_entries_alone() {
        let cache = PageCache::new(8);

        let held = cache.insert(1, zeroed).unwrap();
        cache.discard(1);
        assert!(cache.get(1).is_some());

        drop(held);
        drop(cache.get(1).unwrap());
        cache.discard(1);
        assert!(cache.get(1).is_none());
    }
}
