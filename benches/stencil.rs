//! Stencil kernel benchmarks.
//!
//! Throughput of the per-level kernels on a single block, without any message passing.
//!
//! Run with: cargo bench --bench stencil

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use npb_mg::grid::Grid3D;
use npb_mg::halo::fill_periodic;
use npb_mg::stencil::{
    OPERATOR_A, SMOOTHER_LARGE, apply_smoother, prolongate_add, residual, restrict,
};

fn filled(n: usize) -> Grid3D {
    let mut g = Grid3D::new(n, n, n);
    for (i, v) in g.data.iter_mut().enumerate() {
        *v = ((i * 7919) % 1013) as f64 / 1013.0 - 0.5;
    }
    fill_periodic(&mut g);
    g
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");

    for n in [32usize, 64, 128] {
        let u = filled(n);
        let v = filled(n);
        let mut r = Grid3D::new(n, n, n);
        group.throughput(Throughput::Elements((n * n * n) as u64));

        group.bench_with_input(BenchmarkId::new("residual", n), &n, |b, _| {
            b.iter(|| residual(black_box(&u), black_box(&v), &mut r, &OPERATOR_A));
        });

        let mut w = u.clone();
        group.bench_with_input(BenchmarkId::new("smoother", n), &n, |b, _| {
            b.iter(|| apply_smoother(black_box(&v), &mut w, &SMOOTHER_LARGE));
        });

        let mut coarse = Grid3D::new(n / 2, n / 2, n / 2);
        group.bench_with_input(BenchmarkId::new("restrict", n), &n, |b, _| {
            b.iter(|| restrict(black_box(&u), &mut coarse));
        });

        let coarse = filled(n / 2);
        let mut fine = Grid3D::new(n, n, n);
        group.bench_with_input(BenchmarkId::new("prolongate", n), &n, |b, _| {
            b.iter(|| prolongate_add(black_box(&coarse), &mut fine));
        });

        group.bench_with_input(BenchmarkId::new("periodic_fill", n), &n, |b, _| {
            b.iter(|| fill_periodic(&mut r));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels);
criterion_main!(benches);
