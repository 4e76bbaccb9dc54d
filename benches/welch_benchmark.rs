use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use genediff::multitest::{CorrectionMethod, correct};
use genediff::ttest::{compare_genes, p_values};
use genediff::types::{Diagnosis, Group};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal};

fn random_group(diagnosis: Diagnosis, subjects: usize, genes: usize, seed: u64) -> Group {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = LogNormal::<f64>::new(3.0, 1.0).expect("valid log-normal");
    let values = Array2::from_shape_fn((subjects, genes), |_| dist.sample(&mut rng));
    Group::new(diagnosis, values)
}

fn benchmark_welch(c: &mut Criterion) {
    let gene_counts = [1_000_usize, 5_000, 15_748];

    let mut group = c.benchmark_group("welch_pass");
    for &genes in &gene_counts {
        let control = random_group(Diagnosis::Normal, 24, genes, 0x5EED + genes as u64);
        let treatment = random_group(Diagnosis::EarlyNeoplasia, 26, genes, 0xFEED + genes as u64);
        group.throughput(Throughput::Elements(genes as u64));

        group.bench_with_input(
            BenchmarkId::new("compare_genes", genes),
            &(control, treatment),
            |b, (control, treatment)| {
                b.iter(|| {
                    let tests = compare_genes(black_box(control), black_box(treatment));
                    black_box(tests)
                });
            },
        );
    }
    group.finish();

    let control = random_group(Diagnosis::Normal, 24, 15_748, 1);
    let treatment = random_group(Diagnosis::EarlyNeoplasia, 26, 15_748, 2);
    let raw = compare_genes(&control, &treatment)
        .map(|tests| p_values(&tests))
        .expect("benchmark groups are well formed");

    let mut group = c.benchmark_group("correction");
    for method in [CorrectionMethod::Holm, CorrectionMethod::BenjaminiHochberg] {
        group.bench_function(method.name(), |b| {
            b.iter(|| black_box(correct(black_box(&raw), 0.05, method)));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_welch);
criterion_main!(benches);
