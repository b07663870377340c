//! Crash recovery over the in-memory backend: a "crash" drops every open
//! handle mid-transaction, and a fresh open over the same store observes
//! exactly the bytes the dying process left behind.

use std::path::Path;
use std::time::Duration;

use jotdb::io::DatabaseFile;
use jotdb::storage::journal_path_for;
use jotdb::txn::playback_file;
use jotdb::{BTree, Database, MemVfs, Pager, PagerOptions, Vfs};

const DB: &str = "crash.db";

fn small_cache() -> PagerOptions {
    PagerOptions {
        cache_pages: 4,
        busy_timeout: Duration::from_millis(20),
    }
}

fn key_of(i: u32) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

fn val_of(i: u32) -> Vec<u8> {
    format!("payload {i} ").repeat(8).into_bytes()
}

/// Commits a baseline entry so a later rollback has observable targets.
fn seed_baseline(vfs: &MemVfs) {
    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    db.put(b"baseline", b"v0").unwrap();
}

/// Starts a write transaction that dirties enough pages to spill into the
/// database file, runs commit phase one, then "crashes" by dropping the
/// pager without phase two. Leaves a hot journal behind.
fn crash_after_phase_one(vfs: &MemVfs) {
    let mut pager = Pager::open(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    pager.begin_write().unwrap();

    let mut tree = BTree::new(&mut pager, 1);
    tree.insert(b"baseline", b"overwritten").unwrap();
    for i in 0..64 {
        tree.insert(&key_of(i), &val_of(i)).unwrap();
    }

    pager.commit_phase_one(None).unwrap();
    // Drop without phase two: locks release, the journal stays.
}

#[test]
fn committed_data_survives_reopen() {
    let vfs = MemVfs::new();

    {
        let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
        db.begin_write().unwrap();
        for i in 0..64 {
            db.put(&key_of(i), &val_of(i)).unwrap();
        }
        db.commit().unwrap();
    }

    assert!(
        !vfs.exists(&journal_path_for(Path::new(DB))).unwrap(),
        "journal must be deleted at commit"
    );

    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    for i in 0..64 {
        assert_eq!(db.get(&key_of(i)).unwrap(), Some(val_of(i)));
    }
}

#[test]
fn crash_before_phase_two_rolls_back_on_reopen() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);
    crash_after_phase_one(&vfs);

    let journal_path = journal_path_for(Path::new(DB));
    assert!(vfs.exists(&journal_path).unwrap(), "hot journal left behind");

    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();

    assert_eq!(db.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
    for i in 0..64 {
        assert_eq!(db.get(&key_of(i)).unwrap(), None, "key {i} must roll back");
    }
    assert!(
        !vfs.exists(&journal_path).unwrap(),
        "recovery deletes the journal"
    );
}

#[test]
fn long_lived_connection_recovers_anothers_hot_journal() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);

    // This connection outlives the writer that crashes below, so the
    // open-time recovery path never sees the journal.
    let mut bystander = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    assert_eq!(bystander.get(b"baseline").unwrap(), Some(b"v0".to_vec()));

    crash_after_phase_one(&vfs);
    let journal_path = journal_path_for(Path::new(DB));
    assert!(vfs.exists(&journal_path).unwrap(), "hot journal left behind");

    // The next read transaction replays the journal and drops any cached
    // pages from before the rollback.
    assert_eq!(bystander.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
    assert_eq!(bystander.get(&key_of(7)).unwrap(), None);
    assert!(
        !vfs.exists(&journal_path).unwrap(),
        "recovery deletes the journal"
    );
}

#[test]
fn recovery_is_idempotent() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);
    crash_after_phase_one(&vfs);

    let journal_path = journal_path_for(Path::new(DB));

    // Play the hot journal back by hand, twice, comparing the file bytes.
    {
        let mut journal = vfs.open(&journal_path, false).unwrap();
        let mut db_file = vfs.open(Path::new(DB), false).unwrap();

        let first = playback_file(&mut journal, &mut db_file).unwrap();
        let after_first = vfs.snapshot(Path::new(DB)).unwrap();

        let second = playback_file(&mut journal, &mut db_file).unwrap();
        let after_second = vfs.snapshot(Path::new(DB)).unwrap();

        assert_eq!(first.records_applied, second.records_applied);
        assert_eq!(after_first, after_second);
    }

    // A normal open replays a third time and lands on the same state.
    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    assert_eq!(db.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
    assert_eq!(db.get(&key_of(0)).unwrap(), None);
}

#[test]
fn torn_journal_tail_does_not_block_recovery() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);
    crash_after_phase_one(&vfs);

    // Simulate a torn write: garbage appended past the synced records.
    let journal_path = journal_path_for(Path::new(DB));
    let mut journal = vfs.open(&journal_path, false).unwrap();
    let end = journal.len().unwrap();
    journal.write_at(end, &[0xDE; 1000]).unwrap();
    drop(journal);

    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    assert_eq!(db.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
    assert_eq!(db.get(&key_of(5)).unwrap(), None);
}

/// Resurrects the journal bytes captured just before phase two, simulating
/// a crash after the database flush but before the journal deletion.
fn commit_then_resurrect_journal(vfs: &MemVfs, master: &Path) {
    let mut pager = Pager::open(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    pager.begin_write().unwrap();

    let mut tree = BTree::new(&mut pager, 1);
    for i in 0..32 {
        tree.insert(&key_of(i), &val_of(i)).unwrap();
    }

    pager.commit_phase_one(Some(master)).unwrap();
    let journal_path = journal_path_for(Path::new(DB));
    let journal_bytes = vfs.snapshot(&journal_path).unwrap();
    pager.commit_phase_two().unwrap();
    drop(pager);

    let mut resurrected = vfs.open(&journal_path, true).unwrap();
    resurrected.write_at(0, &journal_bytes).unwrap();
}

#[test]
fn stale_master_journal_keeps_committed_data() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);

    // The master journal file is never created: as far as recovery can
    // tell, the multi-file commit completed and the master was deleted.
    commit_then_resurrect_journal(&vfs, Path::new("master-0001"));

    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    assert_eq!(db.get(&key_of(3)).unwrap(), Some(val_of(3)));
    assert!(
        !vfs.exists(&journal_path_for(Path::new(DB))).unwrap(),
        "stale journal deleted without playback"
    );
}

#[test]
fn live_master_journal_rolls_the_commit_back() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);

    // Master file exists: the multi-file commit never reached its commit
    // point, so this database's part must roll back.
    let master = Path::new("master-0002");
    vfs.open(master, true).unwrap();
    commit_then_resurrect_journal(&vfs, master);

    let mut db = Database::open_on(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    assert_eq!(db.get(&key_of(3)).unwrap(), None);
    assert_eq!(db.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
}

#[test]
fn in_process_rollback_matches_crash_recovery() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);

    let before = vfs.snapshot(Path::new(DB)).unwrap();

    let mut pager = Pager::open(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    pager.begin_write().unwrap();
    let mut tree = BTree::new(&mut pager, 1);
    for i in 0..64 {
        tree.insert(&key_of(i), &val_of(i)).unwrap();
    }
    pager.rollback().unwrap();
    drop(pager);

    assert_eq!(vfs.snapshot(Path::new(DB)).unwrap(), before);
}

#[test]
fn failed_flush_enters_error_state_and_rolls_back() {
    let vfs = MemVfs::new();
    seed_baseline(&vfs);

    let mut pager = Pager::open(vfs.clone(), Path::new(DB), small_cache()).unwrap();
    pager.begin_write().unwrap();
    {
        let mut tree = BTree::new(&mut pager, 1);
        for i in 0..64 {
            tree.insert(&key_of(i), &val_of(i)).unwrap();
        }
    }

    // First database write at commit fails.
    vfs.fail_after_writes(Path::new(DB), 0);
    let err = pager.commit().unwrap_err();
    assert_eq!(jotdb::error_kind(&err), Some(jotdb::ErrorKind::Io));

    vfs.clear_faults(Path::new(DB));
    pager.rollback().unwrap();

    pager.begin_read().unwrap();
    let mut tree = BTree::new(&mut pager, 1);
    assert_eq!(tree.get(b"baseline").unwrap(), Some(b"v0".to_vec()));
    assert_eq!(tree.get(&key_of(0)).unwrap(), None);
}
