use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pointvlad_eval::DescriptorTree;
use pointvlad_model::Descriptors;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

fn random_descriptors(rng: &mut StdRng, rows: usize, dim: usize) -> Descriptors {
    let data = (0..rows * dim)
        .map(|_| rng.random_range(-1.0..1.0))
        .collect::<Vec<f32>>();
    Descriptors::new(data, rows, dim).expect("valid descriptors")
}

fn bench_descriptor_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_tree");
    let mut rng = StdRng::seed_from_u64(0);

    for (rows, dim) in [(400, 256), (3000, 256), (3000, 16)] {
        let database = random_descriptors(&mut rng, rows, dim);
        let queries = random_descriptors(&mut rng, 64, dim);

        group.bench_with_input(
            BenchmarkId::new("build", format!("{rows}x{dim}")),
            &database,
            |b, database| b.iter(|| DescriptorTree::new(black_box(database))),
        );

        let tree = DescriptorTree::new(&database);
        group.bench_with_input(
            BenchmarkId::new("knn25", format!("{rows}x{dim}")),
            &queries,
            |b, queries| {
                b.iter(|| {
                    for query in queries.iter() {
                        black_box(tree.knn(query, 25).expect("knn"));
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_descriptor_tree);
criterion_main!(benches);
