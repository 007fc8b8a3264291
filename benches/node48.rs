//! Micro-benchmarks around the `Inner16` <-> `Inner48` boundary, mirroring
//! `examples/original_source/benchmark/micro_benchmark_node48.cpp`'s split
//! between growth, steady-state operation on a full-shape tree, and shrink.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use radix_art::TreeMap;

fn build_sequential(n: u32) -> TreeMap<Box<[u8]>, u32> {
    let mut map = TreeMap::new();
    for i in 0..n {
        map.insert(Box::from(i.to_be_bytes()), i);
    }
    map
}

fn grow_n16_to_n48_sequentially(c: &mut Criterion) {
    c.bench_function("grow_n16_to_n48_sequentially", |b| {
        b.iter(|| {
            let mut map: TreeMap<Box<[u8]>, u32> = TreeMap::new();
            for i in 0u32..17 {
                map.insert(Box::from(i.to_be_bytes()), black_box(i));
            }
            black_box(&map);
        })
    });
}

fn n48_full_tree_sequential_get(c: &mut Criterion) {
    let map = build_sequential(48);
    c.bench_function("n48_full_tree_sequential_get", |b| {
        b.iter(|| {
            for i in 0u32..48 {
                black_box(map.get(&i.to_be_bytes()));
            }
        })
    });
}

fn n48_full_tree_random_get(c: &mut Criterion) {
    let map = build_sequential(48);
    // Fixed permutation of 0..48, same rationale as node16.rs.
    let order: Vec<u32> = (0..48).map(|i| (i * 17 + 5) % 48).collect();
    c.bench_function("n48_full_tree_random_get", |b| {
        b.iter(|| {
            for &i in &order {
                black_box(map.get(&i.to_be_bytes()));
            }
        })
    });
}

fn n48_full_tree_full_scan(c: &mut Criterion) {
    let map = build_sequential(48);
    c.bench_function("n48_full_tree_full_scan", |b| {
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

fn n48_full_tree_sequential_delete(c: &mut Criterion) {
    c.bench_function("n48_full_tree_sequential_delete", |b| {
        b.iter_batched(
            || build_sequential(48),
            |mut map| {
                for i in 0u32..48 {
                    black_box(map.remove(&i.to_be_bytes()));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn shrink_n48_to_n16(c: &mut Criterion) {
    c.bench_function("shrink_n48_to_n16", |b| {
        b.iter_batched(
            || build_sequential(17),
            |mut map| {
                for i in (5u32..17).rev() {
                    black_box(map.remove(&i.to_be_bytes()));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    grow_n16_to_n48_sequentially,
    n48_full_tree_sequential_get,
    n48_full_tree_random_get,
    n48_full_tree_full_scan,
    n48_full_tree_sequential_delete,
    shrink_n48_to_n16,
);
criterion_main!(benches);
