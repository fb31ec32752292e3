use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pointvlad_nn::linear::linear_layer_gemm;
use rand::random;
use std::hint::black_box;

/// Pointwise layer computed row by row, used as the baseline.
fn linear_layer_sequential(
    src: &[f32],     // Shape: [M, D] flattened
    weight: &[f32],  // Shape: [N, D] flattened
    bias: &[f32],    // Shape: [N]
    dst: &mut [f32], // Shape: [M, N] flattened
    input_dim: usize,
    output_dim: usize,
) {
    dst.chunks_exact_mut(output_dim)
        .zip(src.chunks_exact(input_dim))
        .for_each(|(dst_row, src_row)| {
            for n in 0..output_dim {
                let weight_row = &weight[n * input_dim..(n + 1) * input_dim];
                let sum = src_row
                    .iter()
                    .zip(weight_row.iter())
                    .map(|(s, w)| s * w)
                    .sum::<f32>();
                dst_row[n] = sum + bias[n];
            }
        });
}

fn bench_pointwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("pointwise_layer");

    // (points, input_dim, output_dim) of the extractor stages
    for (rows, input_dim, output_dim) in [(4096, 3, 64), (4096, 64, 128), (4096, 128, 1024)] {
        let src = (0..rows * input_dim).map(|_| random::<f32>()).collect::<Vec<_>>();
        let weight = (0..output_dim * input_dim)
            .map(|_| random::<f32>())
            .collect::<Vec<_>>();
        let bias = (0..output_dim).map(|_| random::<f32>()).collect::<Vec<_>>();
        let mut dst = vec![0.0; rows * output_dim];

        let id = format!("{rows}x{input_dim}->{output_dim}");

        group.bench_with_input(BenchmarkId::new("sequential", &id), &rows, |b, _| {
            b.iter(|| {
                linear_layer_sequential(
                    black_box(&src),
                    black_box(&weight),
                    black_box(&bias),
                    black_box(&mut dst),
                    input_dim,
                    output_dim,
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("gemm", &id), &rows, |b, _| {
            b.iter(|| {
                linear_layer_gemm(
                    black_box(&src),
                    black_box(&weight),
                    black_box(&bias),
                    black_box(&mut dst),
                    rows,
                    input_dim,
                    output_dim,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pointwise);
criterion_main!(benches);
