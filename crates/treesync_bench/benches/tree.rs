//! Tree mutation and diff benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use treesync_bench::{deep_path, key, nested_node, wide_node};
use treesync_core::{diff, EventFilter, Node};

/// Benchmark replacing a deep leaf in a shared tree.
fn bench_set_subtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_subtree");

    for depth in [1usize, 4, 16] {
        let tree = nested_node(4, 8);
        let path = deep_path(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &path, |b, path| {
            b.iter(|| black_box(tree.set_subtree(black_box(path), Node::from(1))));
        });
    }

    group.finish();
}

/// Benchmark reading a deep path.
fn bench_get(c: &mut Criterion) {
    let tree = nested_node(6, 4);
    let path = deep_path(6);
    c.bench_function("get_depth_6", |b| {
        b.iter(|| black_box(tree.get(black_box(&path))));
    });
}

/// Benchmark diffing wide containers with one changed child.
fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    let filter = EventFilter {
        value: true,
        children: true,
    };
    let at = deep_path(0);

    for width in [10usize, 100, 1000] {
        let old = wide_node(width);
        let new = old.with_child(&key(width / 2), Node::from("changed"));
        group.bench_with_input(BenchmarkId::new("one_changed", width), &width, |b, _| {
            b.iter(|| black_box(diff(&at, black_box(&old), black_box(&new), filter)));
        });

        let replaced = wide_node(width).with_child(&key(width), Node::from(true));
        group.bench_with_input(BenchmarkId::new("one_added", width), &width, |b, _| {
            b.iter(|| black_box(diff(&at, black_box(&old), black_box(&replaced), filter)));
        });
    }

    group.finish();
}

/// Benchmark the precondition hash.
fn bench_hash(c: &mut Criterion) {
    let tree = nested_node(3, 10);
    c.bench_function("hash_1000_leaves", |b| {
        b.iter(|| black_box(black_box(&tree).hash()));
    });
}

criterion_group!(benches, bench_set_subtree, bench_get, bench_diff, bench_hash);
criterion_main!(benches);
