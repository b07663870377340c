//! # Insertion and Lookup Benchmarks
//!
//! Measures the storage engine's core write and read paths on a real disk
//! file:
//!
//! - sequential inserts inside one transaction (the tree's best case)
//! - random-order inserts (exercises splits at every level)
//! - commit cost as transaction size grows (journal + flush + sync)
//! - point lookups against a cold and a warm cache
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench insertion
//! cargo bench --bench insertion -- insert     # insert groups only
//! cargo bench --bench insertion -- lookup     # lookup groups only
//! ```

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use jotdb::{Database, PagerOptions};

const INSERT_ROWS: u64 = 10_000;
const LOOKUP_ROWS: u64 = 10_000;

fn key_of(i: u64) -> Vec<u8> {
    format!("bench-key-{i:010}").into_bytes()
}

fn val_of(i: u64) -> Vec<u8> {
    format!("row {i} payload ").repeat(4).into_bytes()
}

/// Deterministic permutation of 0..n.
fn shuffled(n: u64) -> Vec<u64> {
    let mut order: Vec<u64> = (0..n).collect();
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    for i in (1..order.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        order.swap(i, (state % (i as u64 + 1)) as usize);
    }
    order
}

fn fresh_db(dir: &TempDir) -> Database {
    Database::open_with(
        dir.path().join("bench.db"),
        PagerOptions {
            cache_pages: 1024,
            busy_timeout: Duration::from_millis(100),
        },
    )
    .expect("open bench database")
}

fn bench_insert_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_sequential");
    group.throughput(Throughput::Elements(INSERT_ROWS));
    group.sample_size(10);

    group.bench_function("one_transaction", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = fresh_db(&dir);
                (dir, db)
            },
            |(dir, mut db)| {
                db.begin_write().unwrap();
                for i in 0..INSERT_ROWS {
                    db.put(&key_of(i), &val_of(i)).unwrap();
                }
                db.commit().unwrap();
                black_box((dir, db))
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

fn bench_insert_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_random");
    group.throughput(Throughput::Elements(INSERT_ROWS));
    group.sample_size(10);

    let order = shuffled(INSERT_ROWS);

    group.bench_function("one_transaction", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = fresh_db(&dir);
                (dir, db)
            },
            |(dir, mut db)| {
                db.begin_write().unwrap();
                for &i in &order {
                    db.put(&key_of(i), &val_of(i)).unwrap();
                }
                db.commit().unwrap();
                black_box((dir, db))
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

fn bench_commit_granularity(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_commit_granularity");
    group.sample_size(10);

    for batch in [1u64, 100, 1000] {
        let rows = 1000;
        group.throughput(Throughput::Elements(rows));
        group.bench_function(BenchmarkId::new("rows_per_commit", batch), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let db = fresh_db(&dir);
                    (dir, db)
                },
                |(dir, mut db)| {
                    for chunk_start in (0..rows).step_by(batch as usize) {
                        db.begin_write().unwrap();
                        for i in chunk_start..(chunk_start + batch).min(rows) {
                            db.put(&key_of(i), &val_of(i)).unwrap();
                        }
                        db.commit().unwrap();
                    }
                    black_box((dir, db))
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_point");
    group.throughput(Throughput::Elements(LOOKUP_ROWS));
    group.sample_size(10);

    let dir = TempDir::new().unwrap();
    let mut db = fresh_db(&dir);
    db.begin_write().unwrap();
    for i in 0..LOOKUP_ROWS {
        db.put(&key_of(i), &val_of(i)).unwrap();
    }
    db.commit().unwrap();

    let order = shuffled(LOOKUP_ROWS);

    group.bench_function("warm_cache", |b| {
        b.iter(|| {
            db.begin_read().unwrap();
            for &i in &order {
                black_box(db.get(&key_of(i)).unwrap());
            }
            db.rollback().unwrap();
        });
    });

    group.bench_function("cold_cache", |b| {
        b.iter_batched(
            || {
                // A fresh connection starts with an empty page cache.
                Database::open_with(dir.path().join("bench.db"), PagerOptions::default()).unwrap()
            },
            |mut cold| {
                cold.begin_read().unwrap();
                for &i in &order {
                    black_box(cold.get(&key_of(i)).unwrap());
                }
                cold.rollback().unwrap();
                black_box(cold)
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_sequential,
    bench_insert_random,
    bench_commit_granularity,
    bench_lookup
);
criterion_main!(benches);
