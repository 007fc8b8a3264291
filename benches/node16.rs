//! Micro-benchmarks around the `Inner4` <-> `Inner16` boundary: growing into
//! an `Inner16`, operating on a tree built entirely of `Inner16` nodes, and
//! shrinking back down to `Inner4`.
//!
//! Mirrors the node-kind-indexed split of
//! `examples/original_source/benchmark/micro_benchmark_n16.cpp`: that source
//! keeps one file per node capacity class so that regressions in a single
//! shape's fast path show up without noise from the others. `node48.rs` is
//! the sibling for the next capacity class up.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use radix_art::TreeMap;

/// Builds a tree of `n` single-byte keys `0..n`, which is the minimal tree
/// needed to reach a given node kind at the root (5 keys promotes the root
/// to `Inner16`, 17 to `Inner48`, and so on).
fn build_sequential(n: u32) -> TreeMap<Box<[u8]>, u32> {
    let mut map = TreeMap::new();
    for i in 0..n {
        map.insert(Box::from(i.to_be_bytes()), i);
    }
    map
}

fn grow_n4_to_n16_sequentially(c: &mut Criterion) {
    c.bench_function("grow_n4_to_n16_sequentially", |b| {
        b.iter(|| {
            let mut map: TreeMap<Box<[u8]>, u32> = TreeMap::new();
            for i in 0u32..5 {
                map.insert(Box::from(i.to_be_bytes()), black_box(i));
            }
            black_box(&map);
        })
    });
}

fn grow_n4_to_n16_randomly(c: &mut Criterion) {
    // A fixed pseudo-random permutation of 0..5, reproducible across runs
    // without pulling in a `rand` dependency just for this benchmark.
    let order: [u32; 5] = [3, 0, 4, 1, 2];
    c.bench_function("grow_n4_to_n16_randomly", |b| {
        b.iter(|| {
            let mut map: TreeMap<Box<[u8]>, u32> = TreeMap::new();
            for &i in &order {
                map.insert(Box::from(i.to_be_bytes()), black_box(i));
            }
            black_box(&map);
        })
    });
}

fn n16_full_tree_sequential_get(c: &mut Criterion) {
    let map = build_sequential(16);
    c.bench_function("n16_full_tree_sequential_get", |b| {
        b.iter(|| {
            for i in 0u32..16 {
                black_box(map.get(&i.to_be_bytes()));
            }
        })
    });
}

fn n16_full_tree_full_scan(c: &mut Criterion) {
    let map = build_sequential(16);
    c.bench_function("n16_full_tree_full_scan", |b| {
        b.iter(|| {
            map.scan(
                |k, v| {
                    black_box((k, v));
                    false
                },
                true,
            );
        })
    });
}

fn n16_full_tree_sequential_delete(c: &mut Criterion) {
    c.bench_function("n16_full_tree_sequential_delete", |b| {
        b.iter_batched(
            || build_sequential(16),
            |mut map| {
                for i in 0u32..16 {
                    black_box(map.remove(&i.to_be_bytes()));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn shrink_n16_to_n4(c: &mut Criterion) {
    c.bench_function("shrink_n16_to_n4", |b| {
        b.iter_batched(
            || build_sequential(5),
            |mut map| {
                for i in (2u32..5).rev() {
                    black_box(map.remove(&i.to_be_bytes()));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    grow_n4_to_n16_sequentially,
    grow_n4_to_n16_randomly,
    n16_full_tree_sequential_get,
    n16_full_tree_full_scan,
    n16_full_tree_sequential_delete,
    shrink_n16_to_n4,
);
criterion_main!(benches);
