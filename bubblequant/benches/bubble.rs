use criterion::{criterion_group, criterion_main, Criterion};
use bubblequant::_internal_test_data::RANDOM_10K_SETS;
use bubblequant::bubble::PartitionCompactor;

fn refine_10k_sets(c: &mut Criterion) {
    // Ensure the sets have been created
    assert_eq!(RANDOM_10K_SETS.len(), 10_000);

    c.bench_function("Refine 10k observation sets", |b| {
        b.iter(|| {
            let mut compactor = PartitionCompactor::new();
            compactor.refine_all(&RANDOM_10K_SETS);
            assert!(compactor.num_bubbles() > 0);
        })
    });
}

fn rewrite_10k_sets(c: &mut Criterion) {
    let mut compactor = PartitionCompactor::new();
    compactor.refine_all(&RANDOM_10K_SETS);

    c.bench_function("Rewrite 10k observation sets", |b| {
        b.iter(|| {
            let compact = compactor.rewrite_all(&RANDOM_10K_SETS).unwrap();
            assert_eq!(compact.len(), 10_000);
        })
    });
}

criterion_group!(benches, refine_10k_sets, rewrite_10k_sets);
criterion_main!(benches);
