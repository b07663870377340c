//! # Advisory Lock Protocol
//!
//! One [`LockTable`] per database path coordinates readers and the single
//! writer. Lock levels escalate strictly:
//!
//! ```text
//! Unlocked → Shared → Reserved → Pending → Exclusive
//! ```
//!
//! - **Shared**: any number of readers. Blocked only while a writer holds
//!   Pending or Exclusive.
//! - **Reserved**: one connection intends to write. Readers are still
//!   admitted; a second writer is not.
//! - **Pending**: the writer is waiting for existing readers to drain.
//!   New Shared requests are refused so the writer cannot starve.
//! - **Exclusive**: sole access, required before the database file itself
//!   is written.
//!
//! Acquisition blocks the caller, bounded by a busy timeout; expiry yields
//! `ErrorKind::Busy`, which is retryable. A failed escalation to Exclusive
//! drops back to Reserved (clearing Pending) so readers are not wedged by
//! a writer that gave up.
//!
//! Each connection owns a [`LockHandle`] tracking the level it holds; the
//! handle unlocks fully on drop, so a poisoned transaction cannot leak a
//! lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Result;
use parking_lot::{Condvar, Mutex};

use crate::error::{kind_err, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    Unlocked = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    reserved: bool,
    pending: bool,
    exclusive: bool,
}

/// Shared lock state for one database file.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current reader count, for diagnostics and tests.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    pub fn handle(self: &Arc<Self>) -> LockHandle {
        LockHandle {
            table: Arc::clone(self),
            level: LockLevel::Unlocked,
        }
    }
}

/// One connection's view of the lock table.
pub struct LockHandle {
    table: Arc<LockTable>,
    level: LockLevel,
}

impl LockHandle {
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Escalates to `target`, blocking up to `timeout`. Escalation must be
    /// stepwise in the protocol sense but callers may skip levels; each
    /// intermediate level is acquired in order.
    pub fn lock(&mut self, target: LockLevel, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        while self.level < target {
            match self.level {
                LockLevel::Unlocked => self.acquire_shared(deadline)?,
                LockLevel::Shared => self.acquire_reserved(deadline)?,
                LockLevel::Reserved | LockLevel::Pending => self.acquire_exclusive(deadline)?,
                LockLevel::Exclusive => break,
            }
        }

        Ok(())
    }

    /// Downgrades to `target` (`Shared` or `Unlocked`), waking waiters.
    pub fn unlock(&mut self, target: LockLevel) {
        if target >= self.level {
            return;
        }

        let mut state = self.table.state.lock();

        if self.level >= LockLevel::Reserved {
            state.reserved = false;
            state.pending = false;
            state.exclusive = false;
        }

        if target == LockLevel::Unlocked && self.level >= LockLevel::Shared {
            state.readers -= 1;
        }

        self.level = target;
        drop(state);
        self.table.cond.notify_all();
    }

    fn acquire_shared(&mut self, deadline: Instant) -> Result<()> {
        let mut state = self.table.state.lock();

        while state.pending || state.exclusive {
            if self.table.cond.wait_until(&mut state, deadline).timed_out() {
                return Err(kind_err(ErrorKind::Busy, "timed out waiting for shared lock"));
            }
        }

        state.readers += 1;
        self.level = LockLevel::Shared;
        Ok(())
    }

    fn acquire_reserved(&mut self, deadline: Instant) -> Result<()> {
        let mut state = self.table.state.lock();

        while state.reserved || state.pending || state.exclusive {
            if self.table.cond.wait_until(&mut state, deadline).timed_out() {
                return Err(kind_err(
                    ErrorKind::Busy,
                    "timed out waiting for reserved lock (another writer active)",
                ));
            }
        }

        state.reserved = true;
        self.level = LockLevel::Reserved;
        Ok(())
    }

    fn acquire_exclusive(&mut self, deadline: Instant) -> Result<()> {
        let mut state = self.table.state.lock();

        // Gate new readers first; we still count as one reader ourselves.
        state.pending = true;
        self.level = LockLevel::Pending;

        while state.readers > 1 {
            if self.table.cond.wait_until(&mut state, deadline).timed_out() {
                state.pending = false;
                self.level = LockLevel::Reserved;
                drop(state);
                self.table.cond.notify_all();
                return Err(kind_err(
                    ErrorKind::Busy,
                    "timed out waiting for readers to release",
                ));
            }
        }

        state.exclusive = true;
        self.level = LockLevel::Exclusive;
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.unlock(LockLevel::Unlocked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(20);

    #[test]
    fn readers_do_not_block_each_other() {
        let table = Arc::new(LockTable::new());
        let mut a = table.handle();
        let mut b = table.handle();

        a.lock(LockLevel::Shared, T).unwrap();
        b.lock(LockLevel::Shared, T).unwrap();

        assert_eq!(table.reader_count(), 2);
    }

    #[test]
    fn reserved_admits_readers_but_not_writers() {
        let table = Arc::new(LockTable::new());
        let mut writer = table.handle();
        let mut reader = table.handle();
        let mut other_writer = table.handle();

        writer.lock(LockLevel::Reserved, T).unwrap();
        reader.lock(LockLevel::Shared, T).unwrap();

        other_writer.lock(LockLevel::Shared, T).unwrap();
        let err = other_writer.lock(LockLevel::Reserved, T).unwrap_err();
        assert_eq!(
            crate::error::error_kind(&err),
            Some(ErrorKind::Busy)
        );
    }

    #[test]
    fn exclusive_waits_for_readers() {
        let table = Arc::new(LockTable::new());
        let mut writer = table.handle();
        let mut reader = table.handle();

        reader.lock(LockLevel::Shared, T).unwrap();
        writer.lock(LockLevel::Reserved, T).unwrap();

        let err = writer.lock(LockLevel::Exclusive, T).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), Some(ErrorKind::Busy));
        // Failed escalation falls back to Reserved, not Pending.
        assert_eq!(writer.level(), LockLevel::Reserved);

        reader.unlock(LockLevel::Unlocked);
        writer.lock(LockLevel::Exclusive, T).unwrap();
        assert_eq!(writer.level(), LockLevel::Exclusive);
    }

    #[test]
    fn pending_blocks_new_readers() {
        let table = Arc::new(LockTable::new());
        let mut writer = table.handle();
        let mut reader = table.handle();
        let mut late_reader = table.handle();

        reader.lock(LockLevel::Shared, T).unwrap();
        writer.lock(LockLevel::Reserved, T).unwrap();

        // Escalate on another thread so Pending is visible from here.
        let escalation = std::thread::spawn(move || {
            let r = writer.lock(LockLevel::Exclusive, Duration::from_millis(200));
            (writer, r)
        });

        std::thread::sleep(Duration::from_millis(40));
        let err = late_reader.lock(LockLevel::Shared, T).unwrap_err();
        assert_eq!(crate::error::error_kind(&err), Some(ErrorKind::Busy));

        reader.unlock(LockLevel::Unlocked);
        let (mut writer, result) = escalation.join().unwrap();
        result.unwrap();
        assert_eq!(writer.level(), LockLevel::Exclusive);
        writer.unlock(LockLevel::Unlocked);
    }

    #[test]
    fn drop_releases_everything() {
        let table = Arc::new(LockTable::new());

        {
            let mut h = table.handle();
            h.lock(LockLevel::Exclusive, T).unwrap();
        }

        let mut h2 = table.handle();
        h2.lock(LockLevel::Exclusive, T).unwrap();
    }
}
