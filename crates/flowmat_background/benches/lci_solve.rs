use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ndarray::Array1;

use flowmat_background::solver::lci::iterate_lci;
use flowmat_background::{CscBuilder, CscMatrix, DEFAULT_COUNT, DEFAULT_THRESHOLD};

/// Banded background with column sums of 0.5: converges in ~30 iterations.
fn banded(n: usize) -> CscMatrix {
    let mut b = CscBuilder::new(n, n);
    for j in 0..n {
        b.push((j + 1) % n, j, 0.3).unwrap();
        b.push((j + 7) % n, j, 0.2).unwrap();
    }
    b.build()
}

fn bench_iterate_lci(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate_lci");
    for &n in &[100usize, 1_000, 10_000] {
        let a = banded(n);
        let mut bb = CscBuilder::new(1, n);
        for j in 0..n {
            bb.push(0, j, 1.0).unwrap();
        }
        let b = bb.build();
        let mut ad = Array1::zeros(n);
        ad[0] = 1.0;

        group.throughput(Throughput::Elements(a.nnz() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                iterate_lci(
                    black_box(&a),
                    black_box(&b),
                    ad.view(),
                    DEFAULT_THRESHOLD,
                    DEFAULT_COUNT,
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_iterate_lci);
criterion_main!(benches);
