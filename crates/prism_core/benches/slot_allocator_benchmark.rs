//! # Slot Allocator Benchmark
//!
//! Churn patterns the render batcher produces every tick:
//! - steady allocate/free of a small fraction of live slots
//! - one large growth step from a cold start
//!
//! Run with: `cargo bench --package prism_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use prism_core::SlotAllocator;

const MAX_SLOTS: u32 = 1 << 22;

/// Free and re-allocate `churn` slots out of `live` each iteration.
fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_churn");

    for live in [10_000_u32, 100_000, 1_000_000] {
        let churn = live / 100;
        let mut slots = SlotAllocator::new(live, MAX_SLOTS).unwrap();
        let held: Vec<u32> = (0..live).map(|_| slots.allocate().unwrap()).collect();

        group.bench_with_input(BenchmarkId::from_parameter(live), &churn, |b, &churn| {
            b.iter(|| {
                for &slot in held.iter().step_by((live / churn) as usize) {
                    slots.free(slot).unwrap();
                }
                for _ in 0..churn {
                    black_box(slots.allocate().unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Grow from capacity 1 and fill.
fn bench_grow_and_fill(c: &mut Criterion) {
    c.bench_function("grow_and_fill_1M", |b| {
        b.iter(|| {
            let mut slots = SlotAllocator::new(1, MAX_SLOTS).unwrap();
            slots.ensure_capacity(1_000_000).unwrap();
            for _ in 0..1_000_000 {
                black_box(slots.allocate().unwrap());
            }
            slots.live_count()
        });
    });
}

criterion_group!(benches, bench_churn, bench_grow_and_fill);
criterion_main!(benches);
