use itertools::Itertools;
use lazy_static::lazy_static;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bootstrap::ModelInputs;
use crate::bubble::Element;

pub const SMALL_TRUE_COUNTS: [u32; 4] = [40, 25, 60, 30];

lazy_static! {
    /// Three targets and four equivalence classes: two unique, two shared.
    pub static ref SMALL_INPUTS: ModelInputs = ModelInputs::new(
        vec!["t0".to_owned(), "t1".to_owned(), "t2".to_owned()],
        vec![100, 200, 300],
        vec![vec![0], vec![1], vec![0, 1], vec![1, 2]],
    )
    .unwrap();
}

lazy_static! {
    pub static ref RANDOM_1K_TARGET_INPUTS: ModelInputs = random_inputs(1000, 4000);
    pub static ref RANDOM_1K_TARGET_COUNTS: Vec<u32> = random_counts(4000, 1000);
    pub static ref RANDOM_10K_SETS: Vec<Vec<Element>> = random_sets(10_000, 100_000, 20);
}

#[must_use]
pub fn random_inputs(num_targets: usize, num_classes: usize) -> ModelInputs {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2137);

    let names = (0..num_targets).map(|i| format!("target_{}", i)).collect();
    let lengths = (0..num_targets)
        .map(|_| rng.gen_range(200..5000))
        .collect();
    let classes = (0..num_classes)
        .map(|i| {
            // every target gets at least one unique class
            if i < num_targets {
                return vec![i as u32];
            }
            let size = rng.gen_range(2..6);
            (0..size)
                .map(|_| rng.gen_range(0..num_targets as u32))
                .collect_vec()
        })
        .collect();

    ModelInputs::new(names, lengths, classes).unwrap()
}

#[must_use]
pub fn random_counts(num_classes: usize, max_count: u32) -> Vec<u32> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1337);

    (0..num_classes)
        .map(|_| rng.gen_range(0..max_count))
        .collect()
}

/// Observation sets over `[0, universe)` drawn from a small number of
/// overlapping blocks, so that many elements covary.
#[must_use]
pub fn random_sets(num_sets: usize, universe: u32, max_blocks: usize) -> Vec<Vec<Element>> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    let block_size = 50;

    (0..num_sets)
        .map(|_| {
            let num_blocks = rng.gen_range(1..=max_blocks);
            (0..num_blocks)
                .flat_map(|_| {
                    let start = rng.gen_range(0..universe / block_size) * block_size;
                    start..start + block_size
                })
                .sorted_unstable()
                .dedup()
                .collect_vec()
        })
        .collect()
}
