//! Multi-connection lock protocol scenarios: connections to the same
//! in-memory database coordinate through the shared per-path lock table,
//! exactly as separate processes would through file locks.

use std::path::Path;
use std::time::Duration;

use jotdb::{Database, ErrorKind, MemVfs, PagerOptions};

const DB: &str = "locked.db";

fn connect(vfs: &MemVfs) -> Database<MemVfs> {
    let opts = PagerOptions {
        cache_pages: 32,
        busy_timeout: Duration::from_millis(20),
    };
    Database::open_on(vfs.clone(), Path::new(DB), opts).unwrap()
}

#[test]
fn readers_are_admitted_while_a_writer_prepares() {
    let vfs = MemVfs::new();
    let mut writer = connect(&vfs);
    let mut reader = connect(&vfs);

    writer.put(b"k", b"committed").unwrap();

    writer.begin_write().unwrap();
    writer.put(b"k", b"uncommitted").unwrap();

    // Reserved does not exclude readers, and the database file still holds
    // the committed state.
    reader.begin_read().unwrap();
    assert_eq!(reader.get(b"k").unwrap(), Some(b"committed".to_vec()));
    reader.rollback().unwrap();

    writer.commit().unwrap();
    assert_eq!(reader.get(b"k").unwrap(), Some(b"uncommitted".to_vec()));
}

#[test]
fn second_writer_gets_busy() {
    let vfs = MemVfs::new();
    let mut first = connect(&vfs);
    let mut second = connect(&vfs);

    first.begin_write().unwrap();
    first.put(b"a", b"1").unwrap();

    let err = second.begin_write().unwrap_err();
    assert_eq!(jotdb::error_kind(&err), Some(ErrorKind::Busy));

    first.commit().unwrap();

    // Busy is retryable: the same call succeeds once the lock frees.
    second.begin_write().unwrap();
    second.put(b"b", b"2").unwrap();
    second.commit().unwrap();

    assert_eq!(first.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(first.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn commit_waits_out_active_readers() {
    let vfs = MemVfs::new();
    let mut writer = connect(&vfs);
    let mut reader = connect(&vfs);

    writer.put(b"k", b"old").unwrap();

    reader.begin_read().unwrap();

    writer.begin_write().unwrap();
    writer.put(b"k", b"new").unwrap();

    // Phase two needs Exclusive; the open reader forces a retryable busy.
    let err = writer.commit().unwrap_err();
    assert_eq!(jotdb::error_kind(&err), Some(ErrorKind::Busy));

    // The transaction is intact; retry succeeds after the reader leaves.
    reader.rollback().unwrap();
    writer.commit().unwrap();

    assert_eq!(reader.get(b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn reader_revalidates_after_foreign_commit() {
    let vfs = MemVfs::new();
    let mut a = connect(&vfs);
    let mut b = connect(&vfs);

    a.put(b"counter", b"1").unwrap();
    assert_eq!(b.get(b"counter").unwrap(), Some(b"1".to_vec()));

    // B's cache now holds the page; A's commit must invalidate it.
    a.put(b"counter", b"2").unwrap();
    assert_eq!(b.get(b"counter").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn dropping_a_connection_releases_its_locks() {
    let vfs = MemVfs::new();

    {
        let mut holder = connect(&vfs);
        holder.begin_write().unwrap();
        holder.put(b"k", b"v").unwrap();
        // Dropped mid-transaction.
    }

    // The abandoned transaction left a hot journal; the next writer
    // recovers it at open and proceeds.
    let mut next = connect(&vfs);
    next.begin_write().unwrap();
    next.put(b"k", b"fresh").unwrap();
    next.commit().unwrap();

    assert_eq!(next.get(b"k").unwrap(), Some(b"fresh".to_vec()));
}

#[test]
fn concurrent_readers_on_threads() {
    let vfs = MemVfs::new();
    let mut seed = connect(&vfs);
    for i in 0..100u8 {
        seed.put(&[i], &[i, i, i]).unwrap();
    }
    drop(seed);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let vfs = vfs.clone();
            std::thread::spawn(move || {
                let mut db = connect(&vfs);
                db.begin_read().unwrap();
                for i in 0..100u8 {
                    assert_eq!(db.get(&[i]).unwrap(), Some(vec![i, i, i]));
                }
                db.rollback().unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
