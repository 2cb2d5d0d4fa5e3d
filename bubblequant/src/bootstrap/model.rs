use std::error::Error;
use std::fmt::{Display, Formatter};

use log::debug;

use crate::piecewise::PiecewiseIndex;

pub type TargetId = u32;

/// Error occurring when assembling [`ModelInputs`].
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInputsError {
    /// The number of target names differs from the number of lengths.
    LengthMismatch { names: usize, lengths: usize },
    /// An equivalence class has no targets.
    EmptyClass(usize),
    /// An equivalence class references a target that does not exist.
    UnknownTarget { class: usize, target: TargetId },
    /// The effective lengths do not cover exactly `[0, num_targets)`.
    EffectiveLengthsDomain { expected: u64, actual: Option<u64> },
    /// Effective length that is not a positive, finite number.
    InvalidEffectiveLength { target: u64, value: f64 },
}

impl Display for ModelInputsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelInputsError::LengthMismatch { names, lengths } => write!(
                f,
                "Target name count does not match length count ({} names, {} lengths)",
                names, lengths
            ),
            ModelInputsError::EmptyClass(class) => {
                write!(f, "Equivalence class {} is empty", class)
            }
            ModelInputsError::UnknownTarget { class, target } => write!(
                f,
                "Equivalence class {} references unknown target {}",
                class, target
            ),
            ModelInputsError::EffectiveLengthsDomain { expected, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "Effective lengths cover {} targets, expected {}",
                    actual, expected
                ),
                None => write!(
                    f,
                    "Effective lengths do not cover a contiguous range, expected {} targets",
                    expected
                ),
            },
            ModelInputsError::InvalidEffectiveLength { target, value } => write!(
                f,
                "Invalid effective length of target {}: {}",
                target, value
            ),
        }
    }
}

impl Error for ModelInputsError {}

pub type ModelInputsResult<T> = Result<T, ModelInputsError>;

/// Computes the effective length of every target given the mean fragment
/// length.
///
/// Targets at least as long as the mean fragment lose `mean - 1` positions;
/// shorter targets keep their length.
#[must_use]
pub fn effective_lengths(lengths: &[u32], mean_fragment_length: f64) -> Vec<f64> {
    lengths
        .iter()
        .map(|&length| {
            let length = f64::from(length);
            if length >= mean_fragment_length {
                length - mean_fragment_length + 1.0
            } else {
                length
            }
        })
        .collect()
}

/// Mean of a fragment length histogram (index = fragment length).
#[must_use]
pub fn mean_fragment_length(distribution: &[u32]) -> Option<f64> {
    let (total, weighted) = distribution.iter().enumerate().fold(
        (0u64, 0f64),
        |(total, weighted), (length, &count)| {
            (
                total + u64::from(count),
                weighted + length as f64 * f64::from(count),
            )
        },
    );

    (total > 0).then(|| weighted / total as f64)
}

/// Read-only inputs shared by every estimation of a run.
///
/// Equivalence classes are stored with their targets sorted and deduplicated.
/// Effective lengths default to the target lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputs {
    classes: Vec<Vec<TargetId>>,
    target_names: Vec<String>,
    target_lengths: Vec<u32>,
    effective_lengths: PiecewiseIndex<f64>,
    length_weights: Vec<f64>,
    fragment_length_distribution: Vec<u32>,
}

impl ModelInputs {
    pub fn new(
        target_names: Vec<String>,
        target_lengths: Vec<u32>,
        classes: Vec<Vec<TargetId>>,
    ) -> ModelInputsResult<Self> {
        if target_names.len() != target_lengths.len() {
            return Err(ModelInputsError::LengthMismatch {
                names: target_names.len(),
                lengths: target_lengths.len(),
            });
        }

        let num_targets = target_names.len();
        let classes = classes
            .into_iter()
            .enumerate()
            .map(|(class_index, mut class)| {
                if class.is_empty() {
                    return Err(ModelInputsError::EmptyClass(class_index));
                }
                class.sort_unstable();
                class.dedup();
                if let Some(&target) = class.last() {
                    if target as usize >= num_targets {
                        return Err(ModelInputsError::UnknownTarget {
                            class: class_index,
                            target,
                        });
                    }
                }

                Ok(class)
            })
            .collect::<ModelInputsResult<Vec<_>>>()?;

        let lengths: Vec<f64> = target_lengths.iter().map(|&x| f64::from(x)).collect();
        let effective_lengths = PiecewiseIndex::from_values(&lengths);
        Self::validate_effective_lengths(&effective_lengths, num_targets)?;

        debug!(
            "Model inputs: {} targets, {} equivalence classes, {} effective length runs",
            num_targets,
            classes.len(),
            effective_lengths.len()
        );

        let length_weights = Self::length_weights_of(&effective_lengths);

        Ok(Self {
            classes,
            target_names,
            target_lengths,
            effective_lengths,
            length_weights,
            fragment_length_distribution: Vec::new(),
        })
    }

    /// Replaces the effective lengths with an index covering exactly
    /// `[0, num_targets)`.
    pub fn with_effective_lengths(
        mut self,
        effective_lengths: PiecewiseIndex<f64>,
    ) -> ModelInputsResult<Self> {
        Self::validate_effective_lengths(&effective_lengths, self.num_targets())?;
        self.length_weights = Self::length_weights_of(&effective_lengths);
        self.effective_lengths = effective_lengths;

        Ok(self)
    }

    /// Derives effective lengths from the mean fragment length.
    pub fn with_mean_fragment_length(self, mean: f64) -> ModelInputsResult<Self> {
        let values = effective_lengths(&self.target_lengths, mean);
        self.with_effective_lengths(PiecewiseIndex::from_values(&values))
    }

    /// Stores the fragment length histogram and derives effective lengths
    /// from its mean (when it is not empty).
    pub fn with_fragment_length_distribution(
        mut self,
        distribution: Vec<u32>,
    ) -> ModelInputsResult<Self> {
        let mean = mean_fragment_length(&distribution);
        self.fragment_length_distribution = distribution;

        match mean {
            Some(mean) => self.with_mean_fragment_length(mean),
            None => Ok(self),
        }
    }

    fn length_weights_of(effective_lengths: &PiecewiseIndex<f64>) -> Vec<f64> {
        dense_values(effective_lengths)
            .into_iter()
            .map(|length| 1.0 / length)
            .collect()
    }

    fn validate_effective_lengths(
        effective_lengths: &PiecewiseIndex<f64>,
        num_targets: usize,
    ) -> ModelInputsResult<()> {
        let expected = num_targets as u64;
        if effective_lengths.is_empty() {
            return if expected == 0 {
                Ok(())
            } else {
                Err(ModelInputsError::EffectiveLengthsDomain {
                    expected,
                    actual: Some(0),
                })
            };
        }

        let mut next = 0;
        for interval in effective_lengths {
            if interval.lower() != next {
                return Err(ModelInputsError::EffectiveLengthsDomain {
                    expected,
                    actual: None,
                });
            }
            let value = *interval.value();
            if !value.is_finite() || value <= 0.0 {
                return Err(ModelInputsError::InvalidEffectiveLength {
                    target: interval.lower(),
                    value,
                });
            }
            next = interval.upper();
        }

        if next != expected {
            return Err(ModelInputsError::EffectiveLengthsDomain {
                expected,
                actual: Some(next),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.target_names.len()
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn classes(&self) -> &[Vec<TargetId>] {
        &self.classes
    }

    #[must_use]
    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    #[must_use]
    pub fn target_lengths(&self) -> &[u32] {
        &self.target_lengths
    }

    #[must_use]
    pub fn effective_lengths(&self) -> &PiecewiseIndex<f64> {
        &self.effective_lengths
    }

    #[must_use]
    pub fn fragment_length_distribution(&self) -> &[u32] {
        &self.fragment_length_distribution
    }

    /// Expands the effective lengths into one value per target.
    #[must_use]
    pub fn dense_effective_lengths(&self) -> Vec<f64> {
        dense_values(&self.effective_lengths)
    }

    /// `1 / effective length` of every target, expanded once when the
    /// effective lengths are set.
    #[must_use]
    pub fn length_weights(&self) -> &[f64] {
        &self.length_weights
    }
}

fn dense_values(index: &PiecewiseIndex<f64>) -> Vec<f64> {
    let mut dense = Vec::new();
    for interval in index {
        let run = (interval.upper() - interval.lower()) as usize;
        dense.extend(std::iter::repeat(*interval.value()).take(run));
    }

    dense
}
