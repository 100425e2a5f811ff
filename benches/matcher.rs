use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use imclassify::descriptor::{Descriptor, DescriptorMap};
use imclassify::matcher;
use rand::Rng;

const DIM: usize = 1280;

fn random_descriptor(rng: &mut impl Rng) -> Descriptor {
    Descriptor::new((0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect())
}

fn benchmark_match(c: &mut Criterion) {
    let mut rng = rand::rng();
    let query = random_descriptor(&mut rng);

    let mut group = c.benchmark_group("线性匹配");
    for n in [10, 100, 1000] {
        let map: DescriptorMap =
            (0..n).map(|i| (format!("label{i}"), random_descriptor(&mut rng))).collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("best_match", n), &map, |b, map| {
            b.iter(|| matcher::best_match(black_box(&query), map).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("rank", n), &map, |b, map| {
            b.iter(|| matcher::rank(black_box(&query), map).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_match);
criterion_main!(benches);
