use rand::distributions::{Distribution, WeightedIndex};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Draws multinomial resamples of a count vector.
///
/// Every resample has the same total as the true counts; each unit is
/// assigned to a category with probability proportional to its true count.
/// The draw depends only on the counts and the seed. Weights are summed in
/// `u64`, so the total may exceed `u32::MAX`; a single category of a
/// resample saturates at `u32::MAX`.
#[derive(Debug, Clone)]
pub struct MultinomialSampler {
    distribution: Option<WeightedIndex<u64>>,
    num_categories: usize,
    total: u64,
    rng: Xoshiro256PlusPlus,
}

impl MultinomialSampler {
    #[must_use]
    pub fn new(true_counts: &[u32], seed: u64) -> Self {
        let total = true_counts.iter().map(|&x| u64::from(x)).sum();
        // `None` when there is nothing to draw from (no categories or all zero)
        let distribution =
            WeightedIndex::new(true_counts.iter().map(|&count| u64::from(count))).ok();

        Self {
            distribution,
            num_categories: true_counts.len(),
            total,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Draws one resample.
    pub fn sample(&mut self) -> Vec<u32> {
        let mut counts = vec![0u64; self.num_categories];

        for _ in 0..self.total {
            if let Some(category) = self.draw() {
                counts[category] += 1;
            }
        }

        counts
            .into_iter()
            .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
            .collect()
    }

    /// Draws the category of a single unit.
    fn draw(&mut self) -> Option<usize> {
        let rng = &mut self.rng;
        self.distribution
            .as_ref()
            .map(|distribution| distribution.sample(rng))
    }
}

/// Derives `num` bootstrap seeds from a single master seed.
#[must_use]
pub fn seeds_from(master_seed: u64, num: usize) -> Vec<u64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(master_seed);

    (0..num).map(|_| rng.next_u64()).collect()
}
