use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stackfold::folds::{FoldAssignment, FoldOptions};
use stackfold::learners::{BaseLearnerSpec, LearnerConfig, LogisticConfig};
use stackfold::stacking::generate_oof;

fn synthetic(n: usize, n_features: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, n_features), |_| rng.gen_range(-1.0..1.0));
    let y = Array1::from_iter((0..n).map(|i| {
        let signal: f64 = (0..n_features).map(|j| x[[i, j]]).sum();
        if signal > 0.0 {
            1.0
        } else {
            0.0
        }
    }));
    (x, y)
}

fn bench_fold_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold_partition");

    for n_rows in [1_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("partition", n_rows), n_rows, |b, &n| {
            b.iter(|| FoldAssignment::partition(black_box(n), &FoldOptions::default()).unwrap())
        });
    }

    group.finish();
}

fn bench_oof_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("oof_pass");
    group.sample_size(10);

    for n_rows in [500, 2_000].iter() {
        let (x, y) = synthetic(*n_rows, 10, 42);
        let (x_test, _) = synthetic(200, 10, 43);
        let assignment = FoldAssignment::partition(*n_rows, &FoldOptions::default()).unwrap();
        let spec =
            BaseLearnerSpec::new("logit", LearnerConfig::Logistic(LogisticConfig::default()));

        group.bench_with_input(BenchmarkId::new("logistic", n_rows), n_rows, |b, _| {
            b.iter(|| {
                generate_oof(
                    black_box(&spec),
                    black_box(&x),
                    black_box(&y),
                    black_box(&x_test),
                    &assignment,
                    false,
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fold_partition, bench_oof_pass);
criterion_main!(benches);
