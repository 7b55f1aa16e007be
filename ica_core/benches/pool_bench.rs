//! Correlation pool benchmarks.
//!
//! Allocate/resolve round trip on an empty pool and on a nearly full one,
//! where resolve has to scan past every other active slot.

use criterion::{Criterion, criterion_group, criterion_main};
use ica_common::reference::Reference;
use ica_core::device::DevicePool;
use std::hint::black_box;

fn bench_allocate_resolve_empty(c: &mut Criterion) {
    let pool = DevicePool::new();
    let reference = Reference::from_raw(1);

    c.bench_function("pool_allocate_resolve_empty", |b| {
        b.iter(|| {
            pool.allocate(black_box(reference), 7, "Attach").unwrap();
            black_box(pool.resolve(7, &["Attach"]));
        });
    });
}

fn bench_allocate_resolve_crowded(c: &mut Criterion) {
    let pool = DevicePool::new();
    for i in 0..pool.capacity() as u64 - 1 {
        pool.allocate(Reference::from_raw(i + 100), 1000 + i as u32, "Aspirate").unwrap();
    }
    let reference = Reference::from_raw(1);

    c.bench_function("pool_allocate_resolve_crowded", |b| {
        b.iter(|| {
            pool.allocate(black_box(reference), 7, "Attach").unwrap();
            black_box(pool.resolve(7, &["Reattach", "Attach"]));
        });
    });
}

fn bench_lookup(c: &mut Criterion) {
    let pool = DevicePool::new();
    for i in 0..pool.capacity() as u64 {
        pool.allocate(Reference::from_raw(i + 1), i as u32, "Attach").unwrap();
    }
    let last = Reference::from_raw(pool.capacity() as u64);

    c.bench_function("pool_lookup_last_slot", |b| {
        b.iter(|| black_box(pool.lookup(black_box(last))));
    });
}

criterion_group!(
    benches,
    bench_allocate_resolve_empty,
    bench_allocate_resolve_crowded,
    bench_lookup
);
criterion_main!(benches);
