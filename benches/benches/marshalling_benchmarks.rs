//! Marshalling Benchmarks
//!
//! Encode and decode throughput for vectors and matrices in both
//! representations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pyface_bridge::{Decoder, Encoder, RealMatrix, RealSymMatrix, RepresentationMode, ScriptedRuntime};

const MODES: [RepresentationMode; 2] = [RepresentationMode::Generic, RepresentationMode::Dense];

fn vector(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64 * 0.5).collect()
}

fn square(n: usize) -> RealMatrix {
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|r| (0..n).map(|c| (r * n + c) as f64).collect())
        .collect();
    RealMatrix::from_rows(&rows).unwrap_or_else(|_| RealMatrix::zeros(n, n))
}

// ============================================================================
// Vectors
// ============================================================================

fn bench_vector_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_round_trip");
    let rt = ScriptedRuntime::new();

    for size in [10usize, 1_000, 100_000] {
        let values = vector(size);
        group.throughput(Throughput::Elements(size as u64));
        for mode in MODES {
            group.bench_with_input(BenchmarkId::new(mode.to_string(), size), &values, |b, values| {
                let enc = Encoder::new(&rt, mode);
                let dec = Decoder::new(&rt);
                b.iter(|| {
                    let obj = enc.encode_vector(black_box(values)).ok();
                    black_box(obj.and_then(|obj| dec.decode_vector(&obj, values.len()).ok()))
                })
            });
        }
    }

    group.finish();
}

// ============================================================================
// Matrices
// ============================================================================

fn bench_matrix_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_round_trip");
    let rt = ScriptedRuntime::new();

    for n in [4usize, 32, 256] {
        let m = square(n);
        group.throughput(Throughput::Elements((n * n) as u64));
        for mode in MODES {
            group.bench_with_input(BenchmarkId::new(mode.to_string(), n), &m, |b, m| {
                let enc = Encoder::new(&rt, mode);
                let dec = Decoder::new(&rt);
                b.iter(|| {
                    let obj = enc.encode_matrix(black_box(m)).ok();
                    black_box(obj.and_then(|obj| dec.decode_matrix(&obj).ok()))
                })
            });
        }
    }

    group.finish();
}

fn bench_symmetric_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("symmetric_expansion");

    for n in [4usize, 32, 256] {
        let mut s = RealSymMatrix::zeros(n);
        for i in 0..n {
            for j in 0..=i {
                let _ = s.set(i, j, (i + j) as f64);
            }
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), &s, |b, s| {
            b.iter(|| black_box(s.to_full()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_vector_round_trip,
    bench_matrix_round_trip,
    bench_symmetric_expansion
);
criterion_main!(benches);
