//! Benchmarks for literal writes, cached reads and recomputation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use calcmap_core::ComputeTable;

/// Build a table with `n` literals and one computed sum over all of them.
fn summed_table(n: usize) -> ComputeTable<usize, i64> {
    let table = ComputeTable::new();
    for i in 0..n {
        table.set(i, i as i64).unwrap();
    }
    let cells = table.downgrade();
    table
        .set_computed(usize::MAX, move || {
            (0..n).map(|i| cells.get(&i)).sum::<Result<i64, _>>()
        })
        .unwrap();
    table
}

/// Benchmark literal inserts with varying entry counts
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for n in [100, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let table: ComputeTable<usize, i64> = ComputeTable::new();
                table.resize(n / 4);
                for i in 0..n {
                    table.set(i, i as i64).unwrap();
                }
                black_box(table.len())
            });
        });
    }

    group.finish();
}

/// Benchmark reads of a clean computed entry
fn bench_cached_read(c: &mut Criterion) {
    let table = summed_table(500);
    c.bench_function("cached_read", |b| {
        b.iter(|| black_box(table.get(&usize::MAX).unwrap()));
    });
}

/// Benchmark a write followed by the read that recomputes
fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute");

    for n in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let table = summed_table(n);
            let mut tick = 0_i64;
            b.iter(|| {
                tick += 1;
                table.set(0, tick).unwrap();
                black_box(table.get(&usize::MAX).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_cached_read, bench_recompute);
criterion_main!(benches);
