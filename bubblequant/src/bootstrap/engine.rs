use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::bootstrap::estimator::{Estimate, EstimationError, EstimationResult, Estimator};
use crate::bootstrap::model::ModelInputs;
use crate::bootstrap::multinomial::MultinomialSampler;
use crate::bootstrap::writer::{BootstrapWriter, BootstrapWriterError, RunMetadata};
use crate::progress::{DummyProgressNotifier, ProgressNotifier};

/// Fatal error of a bootstrap run.
#[derive(Debug)]
pub enum BootstrapError {
    /// The output sink failed; no further results were written.
    Writer(BootstrapWriterError),
    /// The point estimate could not be computed.
    Estimation(EstimationError),
    /// A worker thread could not be started.
    ThreadSpawn(std::io::Error),
    /// A worker thread panicked outside of an estimation.
    WorkerPanicked(String),
}

impl From<BootstrapWriterError> for BootstrapError {
    fn from(e: BootstrapWriterError) -> Self {
        Self::Writer(e)
    }
}

impl From<EstimationError> for BootstrapError {
    fn from(e: EstimationError) -> Self {
        Self::Estimation(e)
    }
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Writer(e) => write!(f, "Writer error: {}", e),
            BootstrapError::Estimation(e) => write!(f, "Estimation error: {}", e),
            BootstrapError::ThreadSpawn(e) => write!(f, "Could not start worker thread: {}", e),
            BootstrapError::WorkerPanicked(message) => {
                write!(f, "Worker thread panicked: {}", message)
            }
        }
    }
}

impl Error for BootstrapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BootstrapError::Writer(e) => Some(e),
            BootstrapError::Estimation(e) => Some(e),
            BootstrapError::ThreadSpawn(e) => Some(e),
            BootstrapError::WorkerPanicked(_) => None,
        }
    }
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Clone)]
pub struct BootstrapParams {
    seeds: Vec<u64>,
    thread_num: usize,
    progress_notifier: Arc<dyn ProgressNotifier>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl BootstrapParams {
    pub fn builder() -> BootstrapParamsBuilder {
        BootstrapParamsBuilder::new()
    }

    #[must_use]
    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    #[must_use]
    pub fn thread_num(&self) -> usize {
        self.thread_num
    }
}

impl Default for BootstrapParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapParamsBuilder {
    seeds: Vec<u64>,
    thread_num: usize,
    progress_notifier: Arc<dyn ProgressNotifier>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl BootstrapParamsBuilder {
    pub fn new() -> Self {
        Self {
            seeds: Vec::new(),
            thread_num: 0,
            progress_notifier: Arc::new(DummyProgressNotifier),
            cancel_flag: None,
        }
    }

    /// One bootstrap is run per seed; its id is the seed's position.
    pub fn seeds(&mut self, seeds: Vec<u64>) -> &mut Self {
        let mut new = self;
        new.seeds = seeds;
        new
    }

    /// Number of worker threads; `0` runs every bootstrap on the calling
    /// thread.
    pub fn thread_num(&mut self, thread_num: usize) -> &mut Self {
        let mut new = self;
        new.thread_num = thread_num;
        new
    }

    pub fn progress_notifier(&mut self, progress_notifier: Arc<dyn ProgressNotifier>) -> &mut Self {
        let mut new = self;
        new.progress_notifier = progress_notifier;
        new
    }

    /// Flag checked before every seed is claimed; once set, no further
    /// bootstraps are started.
    pub fn cancel_flag(&mut self, cancel_flag: Arc<AtomicBool>) -> &mut Self {
        let mut new = self;
        new.cancel_flag = Some(cancel_flag);
        new
    }

    pub fn build(&mut self) -> BootstrapParams {
        BootstrapParams {
            seeds: self.seeds.clone(),
            thread_num: self.thread_num,
            progress_notifier: self.progress_notifier.clone(),
            cancel_flag: self.cancel_flag.clone(),
        }
    }
}

impl Default for BootstrapParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bootstrap that did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedFailure {
    pub bootstrap_id: usize,
    pub seed: u64,
    pub error: EstimationError,
}

/// Outcome of a bootstrap run that was not aborted.
#[derive(Debug)]
pub struct BootstrapReport<W> {
    writer: W,
    written: Vec<usize>,
    failures: Vec<SeedFailure>,
    skipped: Vec<usize>,
    cancelled: bool,
}

impl<W> BootstrapReport<W> {
    #[must_use]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Ids of the bootstraps written to the sink, sorted.
    #[must_use]
    pub fn written(&self) -> &[usize] {
        &self.written
    }

    /// Failed bootstraps, sorted by id.
    #[must_use]
    pub fn failures(&self) -> &[SeedFailure] {
        &self.failures
    }

    /// Ids of the bootstraps never started because of cancellation.
    #[must_use]
    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether every bootstrap has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug)]
struct SeedQueue {
    pending: VecDeque<(usize, u64)>,
    completed: usize,
}

#[derive(Debug)]
struct SinkState<W> {
    writer: W,
    written: Vec<usize>,
    failures: Vec<SeedFailure>,
    error: Option<BootstrapWriterError>,
}

/// Runs bootstrap estimations for a list of seeds on a fixed pool of
/// threads.
///
/// Every worker repeatedly claims a seed, draws a multinomial resample of the
/// true counts, runs the estimator on it and hands the result to the
/// writer. The seed queue and the writer are guarded by two independent
/// locks, neither held during estimation.
///
/// A failing or panicking estimation only fails its own seed. A failing
/// writer stops the run: workers stop claiming seeds and the error is
/// returned once all of them have exited.
#[derive(Debug)]
pub struct ResamplingEngine<'a, E, W> {
    inputs: &'a ModelInputs,
    true_counts: &'a [u32],
    estimator: &'a E,
    thread_num: usize,
    num_seeds: usize,
    progress_notifier: Arc<dyn ProgressNotifier>,
    cancel_flag: Option<Arc<AtomicBool>>,
    aborted: AtomicBool,
    queue: Mutex<SeedQueue>,
    sink: Mutex<SinkState<W>>,
}

impl<'a, E: Estimator, W: BootstrapWriter> ResamplingEngine<'a, E, W> {
    #[must_use]
    pub fn new(
        inputs: &'a ModelInputs,
        true_counts: &'a [u32],
        estimator: &'a E,
        writer: W,
        params: BootstrapParams,
    ) -> Self {
        let num_seeds = params.seeds.len();
        let pending = params.seeds.into_iter().enumerate().collect();

        Self {
            inputs,
            true_counts,
            estimator,
            thread_num: params.thread_num,
            num_seeds,
            progress_notifier: params.progress_notifier,
            cancel_flag: params.cancel_flag,
            aborted: AtomicBool::new(false),
            queue: Mutex::new(SeedQueue {
                pending,
                completed: 0,
            }),
            sink: Mutex::new(SinkState {
                writer,
                written: Vec::with_capacity(num_seeds),
                failures: Vec::new(),
                error: None,
            }),
        }
    }

    /// Runs all bootstraps and returns once every worker has exited.
    pub fn run(self) -> BootstrapResult<BootstrapReport<W>> {
        let start = Instant::now();
        info!(
            "Starting bootstrap: {} seeds, {} threads",
            self.num_seeds,
            self.thread_num.max(1)
        );
        self.progress_notifier.set_iter_num(self.num_seeds as u64);

        if self.thread_num == 0 {
            panic::catch_unwind(AssertUnwindSafe(|| self.worker(0))).map_err(|payload| {
                BootstrapError::WorkerPanicked(panic_message(payload.as_ref()))
            })?;
        } else {
            self.run_pool()?;
        }

        let queue = self
            .queue
            .into_inner()
            .expect("Could not acquire seed queue lock");
        let sink = self.sink.into_inner().expect("Could not acquire writer lock");

        if let Some(error) = sink.error {
            return Err(BootstrapError::Writer(error));
        }

        let mut written = sink.written;
        written.sort_unstable();
        let mut failures = sink.failures;
        failures.sort_unstable_by_key(|failure| failure.bootstrap_id);
        let skipped: Vec<usize> = queue.pending.into_iter().map(|(id, _)| id).collect();

        info!(
            "Bootstrap finished in {:.2?}: {} written, {} failed, {} skipped",
            start.elapsed(),
            written.len(),
            failures.len(),
            skipped.len()
        );

        Ok(BootstrapReport {
            writer: sink.writer,
            written,
            failures,
            cancelled: !skipped.is_empty(),
            skipped,
        })
    }

    fn run_pool(&self) -> BootstrapResult<()> {
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.thread_num);
            let mut spawn_error = None;

            for worker_id in 0..self.thread_num {
                let spawned = thread::Builder::new()
                    .name(format!("bootstrap-{}", worker_id))
                    .spawn_scoped(scope, move || self.worker(worker_id));

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        self.aborted.store(true, Ordering::SeqCst);
                        spawn_error = Some(BootstrapError::ThreadSpawn(e));
                        break;
                    }
                }
            }

            let mut result = spawn_error.map_or(Ok(()), Err);
            for handle in handles {
                if let Err(payload) = handle.join() {
                    self.aborted.store(true, Ordering::SeqCst);
                    let message = panic_message(payload.as_ref());
                    if result.is_ok() {
                        result = Err(BootstrapError::WorkerPanicked(message));
                    }
                }
            }

            result
        })
    }

    fn worker(&self, worker_id: usize) {
        trace!("Bootstrap worker {} started", worker_id);

        while !self.should_stop() {
            let (bootstrap_id, seed) = match self.claim_seed() {
                Some(claimed) => claimed,
                None => break,
            };
            trace!(
                "Worker {} claimed bootstrap {} (seed {})",
                worker_id,
                bootstrap_id,
                seed
            );

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.bootstrap(seed)))
                .unwrap_or_else(|payload| {
                    Err(EstimationError::Panicked(panic_message(payload.as_ref())))
                });
            self.finish(bootstrap_id, seed, result);
        }

        trace!("Bootstrap worker {} finished", worker_id);
    }

    fn should_stop(&self) -> bool {
        if self.aborted.load(Ordering::SeqCst) {
            return true;
        }

        match &self.cancel_flag {
            Some(flag) => flag.load(Ordering::SeqCst),
            None => false,
        }
    }

    fn queue(&self) -> MutexGuard<'_, SeedQueue> {
        self.queue.lock().expect("Could not acquire seed queue lock")
    }

    fn sink(&self) -> MutexGuard<'_, SinkState<W>> {
        self.sink.lock().expect("Could not acquire writer lock")
    }

    fn claim_seed(&self) -> Option<(usize, u64)> {
        self.queue().pending.pop_front()
    }

    fn bootstrap(&self, seed: u64) -> EstimationResult<Estimate> {
        let resample = MultinomialSampler::new(self.true_counts, seed).sample();
        self.estimator.estimate(&resample, self.inputs)
    }

    fn finish(&self, bootstrap_id: usize, seed: u64, result: EstimationResult<Estimate>) {
        {
            let mut sink = self.sink();
            match result {
                Ok(estimate) => {
                    if sink.error.is_none() {
                        match sink.writer.write_bootstrap(&estimate, bootstrap_id) {
                            Ok(()) => sink.written.push(bootstrap_id),
                            Err(e) => {
                                warn!("Could not write bootstrap {}: {}", bootstrap_id, e);
                                sink.error = Some(e);
                                self.aborted.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        "Bootstrap {} (seed {}) failed: {}",
                        bootstrap_id, seed, error
                    );
                    sink.failures.push(SeedFailure {
                        bootstrap_id,
                        seed,
                        error,
                    });
                }
            }
        }

        let completed = {
            let mut queue = self.queue();
            queue.completed += 1;
            queue.completed
        };
        debug!(
            "Bootstrap {} done ({}/{})",
            bootstrap_id, completed, self.num_seeds
        );
        self.progress_notifier.inc_iter();
    }
}

/// Runs the bootstraps of `params` and returns the report.
pub fn run_bootstraps<E: Estimator, W: BootstrapWriter>(
    inputs: &ModelInputs,
    true_counts: &[u32],
    estimator: &E,
    writer: W,
    params: BootstrapParams,
) -> BootstrapResult<BootstrapReport<W>> {
    ResamplingEngine::new(inputs, true_counts, estimator, writer, params).run()
}

/// Full quantification: initializes the writer, writes the point estimate
/// of the true counts and runs the bootstraps.
pub fn quantify<E: Estimator, W: BootstrapWriter>(
    inputs: &ModelInputs,
    true_counts: &[u32],
    estimator: &E,
    mut writer: W,
    metadata: &RunMetadata,
    params: BootstrapParams,
) -> BootstrapResult<BootstrapReport<W>> {
    writer.init(metadata)?;

    let estimate = estimator.estimate(true_counts, inputs)?;
    info!(
        "Point estimate: {} rounds, converged: {}",
        estimate.rounds, estimate.converged
    );
    writer.write_main(&estimate, inputs.target_names(), inputs.target_lengths())?;

    run_bootstraps(inputs, true_counts, estimator, writer, params)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
