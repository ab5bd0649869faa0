//! Criterion micro-benchmarks for `EntityLocker`.
//!
//! Benchmarks:
//! - Uncontended entity section (acquire, run, release, entry removal)
//! - Reentrant nested entity section
//! - Global exclusive section
//! - Multi-thread throughput over a small and a large key space

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use elock::{EntityKey, EntityLocker};

fn criterion_config() -> Criterion {
    Criterion::default().configure_from_args()
}

fn key(n: usize) -> EntityKey {
    EntityKey::new("bench", n.to_string())
}

// ---------------------------------------------------------------------------
// Single-thread benchmarks
// ---------------------------------------------------------------------------

fn bench_entity_section(c: &mut Criterion) {
    let mut group = c.benchmark_group("locker/entity_section");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("uncontended", |b| {
        let locker = EntityLocker::new();
        let k = key(42);
        b.iter(|| locker.lock_execute(&k, || black_box(1_u64)).unwrap());
    });

    group.bench_function("reentrant_depth_2", |b| {
        let locker = EntityLocker::new();
        let k = key(42);
        b.iter(|| {
            locker
                .lock_execute(&k, || locker.lock_execute(&k, || black_box(1_u64)).unwrap())
                .unwrap()
        });
    });

    group.bench_function("with_timeout", |b| {
        let locker = EntityLocker::new();
        let k = key(42);
        b.iter(|| {
            locker
                .lock_execute_timeout(Duration::from_secs(1), &k, || black_box(1_u64))
                .unwrap()
        });
    });

    group.finish();
}

fn bench_global_section(c: &mut Criterion) {
    let mut group = c.benchmark_group("locker/global_section");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("uncontended", |b| {
        let locker = EntityLocker::new();
        b.iter(|| locker.global_lock_execute(|| black_box(1_u64)).unwrap());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Multi-thread benchmarks
// ---------------------------------------------------------------------------

fn bench_multi_thread(c: &mut Criterion) {
    const THREADS: usize = 8;
    const OPS_PER_THREAD: usize = 2_000;

    let mut group = c.benchmark_group("locker/multi_thread");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for &keys in &[2_usize, 1_024] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &keys| {
            b.iter(|| {
                let locker = EntityLocker::new();
                let done = AtomicUsize::new(0);
                thread::scope(|s| {
                    for t in 0..THREADS {
                        let locker = &locker;
                        let done = &done;
                        s.spawn(move || {
                            for i in 0..OPS_PER_THREAD {
                                let k = key((t * OPS_PER_THREAD + i) % keys);
                                locker
                                    .lock_execute(&k, || done.fetch_add(1, Ordering::Relaxed))
                                    .unwrap();
                            }
                        });
                    }
                });
                assert!(locker.is_table_empty());
                done.load(Ordering::Relaxed)
            });
        });
    }

    group.finish();
}

criterion_group!(
    name = single_thread;
    config = criterion_config();
    targets =
        bench_entity_section,
        bench_global_section
);

criterion_group!(
    name = multi_thread;
    config = criterion_config();
    targets =
        bench_multi_thread
);

criterion_main!(single_thread, multi_thread);
