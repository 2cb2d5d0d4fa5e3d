//! Bootstrap estimation of abundance uncertainty.
//!
//! [`ResamplingEngine`] repeatedly resamples the observed per-class counts
//! with [`MultinomialSampler`], re-runs an [`Estimator`] on every resample
//! and streams the results to a [`BootstrapWriter`].

mod engine;
mod estimator;
mod model;
mod multinomial;
mod writer;

pub use engine::{
    quantify, run_bootstraps, BootstrapError, BootstrapParams, BootstrapParamsBuilder,
    BootstrapReport, BootstrapResult, ResamplingEngine, SeedFailure,
};
pub use estimator::{
    EmEstimator, EmParams, EmParamsBuilder, Estimate, EstimationError, EstimationResult,
    Estimator,
};
pub use model::{
    effective_lengths, mean_fragment_length, ModelInputs, ModelInputsError, ModelInputsResult,
    TargetId,
};
pub use multinomial::{seeds_from, MultinomialSampler};
pub use writer::{
    BootstrapRecord, BootstrapWriteResult, BootstrapWriter, BootstrapWriterError, MainResult,
    MemoryBootstrapWriter, MsgpackBootstrapWriter, MsgpackRecordReader, RunMetadata,
    TsvBootstrapWriter, ABUNDANCE_FILE, RUN_INFO_FILE,
};
