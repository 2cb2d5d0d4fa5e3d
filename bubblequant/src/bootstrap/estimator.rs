use std::error::Error;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::bootstrap::model::ModelInputs;

/// Error occurring when estimating abundances for one count vector.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// The count vector does not have one count per equivalence class.
    DimensionMismatch { expected: usize, actual: usize },
    /// The estimate of a target is not a finite number.
    NonFiniteEstimate(usize),
    /// The estimator panicked.
    Panicked(String),
    /// Error reported by a custom estimator.
    Other(String),
}

impl Display for EstimationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimationError::DimensionMismatch { expected, actual } => write!(
                f,
                "Count vector has {} entries, expected {}",
                actual, expected
            ),
            EstimationError::NonFiniteEstimate(target) => {
                write!(f, "Non-finite estimate for target {}", target)
            }
            EstimationError::Panicked(message) => write!(f, "Estimator panicked: {}", message),
            EstimationError::Other(message) => write!(f, "Estimation failed: {}", message),
        }
    }
}

impl Error for EstimationError {}

pub type EstimationResult<T> = Result<T, EstimationError>;

/// Abundances estimated from one count vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Estimated number of fragments originating from each target.
    pub alpha: Vec<f64>,
    /// Relative abundance per unit of effective length.
    pub rho: Vec<f64>,
    /// Number of rounds the estimator ran.
    pub rounds: u32,
    pub converged: bool,
}

impl Estimate {
    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.alpha.len()
    }

    /// Transcripts per million.
    #[must_use]
    pub fn tpm(&self) -> Vec<f64> {
        self.rho.iter().map(|rho| rho * 1e6).collect()
    }

    #[must_use]
    pub fn total_alpha(&self) -> f64 {
        self.alpha.iter().sum()
    }
}

/// Computes an [`Estimate`] from per-class counts.
///
/// Implementations are shared by reference between worker threads and must
/// not keep state between calls.
pub trait Estimator: Sync {
    fn estimate(&self, counts: &[u32], inputs: &ModelInputs) -> EstimationResult<Estimate>;
}

impl<T: Estimator> Estimator for &T {
    fn estimate(&self, counts: &[u32], inputs: &ModelInputs) -> EstimationResult<Estimate> {
        T::estimate(self, counts, inputs)
    }
}

#[derive(Debug, Clone)]
pub struct EmParams {
    min_rounds: u32,
    max_rounds: u32,
    alpha_limit: f64,
    alpha_change_limit: f64,
    alpha_change: f64,
}

impl EmParams {
    pub fn builder() -> EmParamsBuilder {
        EmParamsBuilder::new()
    }
}

impl Default for EmParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone)]
pub struct EmParamsBuilder {
    min_rounds: u32,
    max_rounds: u32,
    alpha_limit: f64,
    alpha_change_limit: f64,
    alpha_change: f64,
}

impl EmParamsBuilder {
    pub fn new() -> Self {
        Self {
            min_rounds: 50,
            max_rounds: 10_000,
            alpha_limit: 1e-7,
            alpha_change_limit: 1e-2,
            alpha_change: 1e-2,
        }
    }

    /// Rounds always run before convergence is checked.
    pub fn min_rounds(&mut self, min_rounds: u32) -> &mut Self {
        let mut new = self;
        new.min_rounds = min_rounds;
        new
    }

    pub fn max_rounds(&mut self, max_rounds: u32) -> &mut Self {
        let mut new = self;
        new.max_rounds = max_rounds;
        new
    }

    /// Final estimates below `alpha_limit / 10` are set to zero.
    pub fn alpha_limit(&mut self, alpha_limit: f64) -> &mut Self {
        let mut new = self;
        new.alpha_limit = alpha_limit;
        new
    }

    /// Estimates below this value are ignored when checking convergence.
    pub fn alpha_change_limit(&mut self, alpha_change_limit: f64) -> &mut Self {
        let mut new = self;
        new.alpha_change_limit = alpha_change_limit;
        new
    }

    /// Relative change under which an estimate is considered converged.
    pub fn alpha_change(&mut self, alpha_change: f64) -> &mut Self {
        let mut new = self;
        new.alpha_change = alpha_change;
        new
    }

    pub fn build(&mut self) -> EmParams {
        EmParams {
            min_rounds: self.min_rounds,
            max_rounds: self.max_rounds.max(self.min_rounds),
            alpha_limit: self.alpha_limit,
            alpha_change_limit: self.alpha_change_limit,
            alpha_change: self.alpha_change,
        }
    }
}

impl Default for EmParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Denominators below this are treated as zero
const TOLERANCE: f64 = f64::MIN_POSITIVE;

/// Expectation-maximization over equivalence classes, weighting every target
/// by the inverse of its effective length.
#[derive(Debug, Clone, Default)]
pub struct EmEstimator {
    params: EmParams,
}

impl EmEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_params(params: EmParams) -> Self {
        Self { params }
    }

    fn em_round(
        &self,
        counts: &[u32],
        inputs: &ModelInputs,
        weights: &[f64],
        alpha: &[f64],
        next_alpha: &mut [f64],
    ) {
        next_alpha.fill(0.0);

        for (class, &count) in inputs.classes().iter().zip(counts) {
            if count == 0 {
                continue;
            }
            let count = f64::from(count);

            if let [target] = class.as_slice() {
                next_alpha[*target as usize] += count;
                continue;
            }

            let denominator: f64 = class
                .iter()
                .map(|&target| alpha[target as usize] * weights[target as usize])
                .sum();
            if denominator < TOLERANCE {
                continue;
            }

            let count_over_denominator = count / denominator;
            for &target in class {
                let target = target as usize;
                next_alpha[target] += alpha[target] * weights[target] * count_over_denominator;
            }
        }
    }

    fn is_converged(&self, alpha: &[f64], next_alpha: &[f64]) -> bool {
        alpha.iter().zip(next_alpha).all(|(&old, &new)| {
            new <= self.params.alpha_change_limit
                || (new - old).abs() / new <= self.params.alpha_change
        })
    }
}

impl Estimator for EmEstimator {
    fn estimate(&self, counts: &[u32], inputs: &ModelInputs) -> EstimationResult<Estimate> {
        if counts.len() != inputs.num_classes() {
            return Err(EstimationError::DimensionMismatch {
                expected: inputs.num_classes(),
                actual: counts.len(),
            });
        }

        let num_targets = inputs.num_targets();
        let weights = inputs.length_weights();

        let total: f64 = counts.iter().map(|&x| f64::from(x)).sum();
        let initial = if num_targets > 0 {
            total / num_targets as f64
        } else {
            0.0
        };
        let mut alpha = vec![initial; num_targets];
        let mut next_alpha = vec![0.0; num_targets];

        let mut rounds = 0;
        let mut converged = false;
        while rounds < self.params.max_rounds {
            self.em_round(counts, inputs, weights, &alpha, &mut next_alpha);
            rounds += 1;

            converged = self.is_converged(&alpha, &next_alpha);
            std::mem::swap(&mut alpha, &mut next_alpha);
            if converged && rounds >= self.params.min_rounds {
                break;
            }
        }

        let zero_limit = self.params.alpha_limit / 10.0;
        for value in &mut alpha {
            if *value < zero_limit {
                *value = 0.0;
            }
        }
        if let Some(target) = alpha.iter().position(|value| !value.is_finite()) {
            return Err(EstimationError::NonFiniteEstimate(target));
        }

        let rho = compute_rho(&alpha, weights);
        trace!(
            "EM finished after {} rounds (converged: {}), total {:.2}",
            rounds,
            converged,
            alpha.iter().sum::<f64>()
        );

        Ok(Estimate {
            alpha,
            rho,
            rounds,
            converged,
        })
    }
}

fn compute_rho(alpha: &[f64], weights: &[f64]) -> Vec<f64> {
    let mut rho = alpha
        .iter()
        .zip(weights)
        .map(|(alpha, weight)| alpha * weight)
        .collect_vec();
    let total: f64 = rho.iter().sum();

    if total > 0.0 {
        rho.iter_mut().for_each(|value| *value /= total);
    }

    rho
}
