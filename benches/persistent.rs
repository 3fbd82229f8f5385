//! Benchmarks for the persistent containers.
//!
//! The interesting costs are the copy-on-write spines: every insert clones
//! one root-to-leaf path, every indexed read walks one. The benchmarks pit
//! sequential against shuffled key orders to expose re-balancing overhead.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use arbor::btree::Tree;
use arbor::vector::Vector;

fn shuffled(count: usize) -> Vec<usize> {
    // multiplicative scramble; 37 is coprime to every power of two
    (0..count).map(|i| (i * 37) % count).collect()
}

fn bench_tree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_with");

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            b.iter(|| {
                let mut tree = Tree::immutable();
                for k in 0..count {
                    tree = tree.with(k, k);
                }
                tree
            });
        });

        group.bench_with_input(BenchmarkId::new("shuffled", count), count, |b, &count| {
            let keys = shuffled(count);
            b.iter(|| {
                let mut tree = Tree::immutable();
                for &k in &keys {
                    tree = tree.with(k, k);
                }
                tree
            });
        });
    }

    group.finish();
}

fn bench_tree_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_find");

    for count in [100usize, 1000].iter() {
        let mut tree = Tree::immutable();
        for k in 0..*count {
            tree = tree.with(k, k);
        }
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("existing", count), count, |b, &count| {
            b.iter(|| {
                for k in 0..count {
                    black_box(tree.find(&k));
                }
            });
        });
    }

    group.finish();
}

fn bench_vector_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_push");

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("append", count), count, |b, &count| {
            b.iter(|| {
                let mut v = Vector::immutable();
                for x in 0..count {
                    v = v.push(x);
                }
                v
            });
        });
    }

    group.finish();
}

fn bench_vector_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_get");

    for count in [100usize, 1000].iter() {
        let mut v = Vector::immutable();
        for x in 0..*count {
            v = v.push(x);
        }
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("sweep", count), count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    black_box(v.get(i).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tree_insert,
    bench_tree_find,
    bench_vector_push,
    bench_vector_get
);
criterion_main!(benches);
