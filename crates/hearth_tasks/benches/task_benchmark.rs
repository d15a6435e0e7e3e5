//! # Task Pool Benchmark
//!
//! Measures scheduling overhead for tiny tasks:
//! 1. Fire-and-forget throughput on 1 and N workers
//! 2. Round trip through a completion handle

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hearth_tasks::{default_workers, TaskScheduler, TaskSchedulerConfig};

const BATCH: u64 = 10_000;

fn run_batch(scheduler: &TaskScheduler, counter: &Arc<AtomicU64>) {
    counter.store(0, Ordering::Relaxed);
    let handles: Vec<_> = (0..BATCH)
        .map(|i| {
            let counter = Arc::clone(counter);
            scheduler
                .schedule_with_handle(move || {
                    counter.fetch_add(black_box(i) & 1, Ordering::Relaxed);
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        black_box(handle.wait());
    }
}

fn bench_single_worker(c: &mut Criterion) {
    let scheduler = TaskScheduler::new(&TaskSchedulerConfig::with_workers(1)).unwrap();
    let counter = Arc::new(AtomicU64::new(0));

    c.bench_function("tasks_10k_1_worker", |b| {
        b.iter(|| run_batch(&scheduler, &counter));
    });
}

fn bench_default_workers(c: &mut Criterion) {
    let scheduler = TaskScheduler::new(&TaskSchedulerConfig::default()).unwrap();
    let counter = Arc::new(AtomicU64::new(0));

    c.bench_function(&format!("tasks_10k_{}_workers", default_workers()), |b| {
        b.iter(|| run_batch(&scheduler, &counter));
    });
}

fn bench_round_trip(c: &mut Criterion) {
    let scheduler = TaskScheduler::new(&TaskSchedulerConfig::with_workers(1)).unwrap();

    c.bench_function("task_round_trip", |b| {
        b.iter(|| {
            let handle = scheduler.schedule_with_handle(|| black_box(())).unwrap();
            black_box(handle.wait())
        });
    });
}

criterion_group!(benches, bench_single_worker, bench_default_workers, bench_round_trip);
criterion_main!(benches);
