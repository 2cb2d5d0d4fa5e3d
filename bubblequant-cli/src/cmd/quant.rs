use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use bubblequant::bootstrap::{
    quantify, seeds_from, BootstrapParams, BootstrapReport, BootstrapWriter, EmEstimator,
    ModelInputs, MsgpackBootstrapWriter, RunMetadata, TsvBootstrapWriter,
};
use bubblequant::progress::ProgressNotifier;
use chrono::Local;
use clap::ArgEnum;
use itertools::Itertools;
use log::{info, warn};

use crate::input::{read_classes, read_targets};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum OutputFormat {
    /// Directory with `run_info.json`, `abundance.tsv` and one TSV file per
    /// bootstrap
    Tsv,
    /// Single `bootstraps.msgpack` stream of MessagePack records
    Msgpack,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Tsv => write!(f, "tsv"),
            OutputFormat::Msgpack => write!(f, "msgpack"),
        }
    }
}

pub const MSGPACK_FILE: &str = "bootstraps.msgpack";

#[derive(Debug, Clone)]
pub(crate) struct QuantOptions {
    pub bootstraps: usize,
    pub seed: u64,
    pub threads: Option<usize>,
    pub fragment_length: Option<f64>,
    pub format: OutputFormat,
    pub compression: Option<u32>,
}

pub(crate) fn quant<R1: Read, R2: Read>(
    classes_reader: R1,
    targets_reader: R2,
    output: &Path,
    options: &QuantOptions,
    progress_notifier: Arc<dyn ProgressNotifier>,
) -> anyhow::Result<()> {
    let targets = read_targets(targets_reader).context("Could not read targets")?;
    let classes = read_classes(classes_reader).context("Could not read equivalence classes")?;

    let mut inputs = ModelInputs::new(targets.names, targets.lengths, classes.classes)
        .context("Invalid quantification inputs")?;
    if let Some(fragment_length) = options.fragment_length {
        inputs = inputs
            .with_mean_fragment_length(fragment_length)
            .context("Invalid fragment length")?;
    }

    let metadata = RunMetadata::new(&inputs, &classes.counts, options.bootstraps)
        .with_call(std::env::args().join(" "))
        .with_start_time(Local::now().format("%a %b %e %T %Y").to_string());

    let mut params = BootstrapParams::builder();
    params
        .seeds(seeds_from(options.seed, options.bootstraps))
        .progress_notifier(progress_notifier);
    if let Some(threads) = options.threads {
        params.thread_num(threads);
    }
    let params = params.build();

    std::fs::create_dir_all(output)
        .with_context(|| format!("Could not create directory {}", output.display()))?;
    let estimator = EmEstimator::new();

    match options.format {
        OutputFormat::Tsv => {
            let mut writer = TsvBootstrapWriter::new(output);
            if let Some(level) = options.compression {
                writer = writer.with_compression(level);
            }

            let report = quantify(
                &inputs,
                &classes.counts,
                &estimator,
                writer,
                &metadata,
                params,
            )?;
            summarize(&report)?;
        }
        OutputFormat::Msgpack => {
            let path = output.join(MSGPACK_FILE);
            let file = File::create(&path)
                .with_context(|| format!("Could not create {}", path.display()))?;
            let writer = MsgpackBootstrapWriter::new(BufWriter::new(file));

            let report = quantify(
                &inputs,
                &classes.counts,
                &estimator,
                writer,
                &metadata,
                params,
            )?;
            summarize(&report)?;
        }
    }

    Ok(())
}

fn summarize<W: BootstrapWriter>(report: &BootstrapReport<W>) -> anyhow::Result<()> {
    for failure in report.failures() {
        warn!(
            "Bootstrap {} (seed {}) failed: {}",
            failure.bootstrap_id, failure.seed, failure.error
        );
    }

    let total = report.written().len() + report.failures().len() + report.skipped().len();
    if total > 0 && report.written().is_empty() {
        bail!("All {} bootstraps failed", total);
    }

    info!(
        "Written {}/{} bootstraps",
        report.written().len(),
        total
    );
    Ok(())
}
