#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use cmd::{compact, inspect, lengths, quant};
use human_panic::setup_panic;
use lazy_static::lazy_static;

use crate::logging::init_logging;
use crate::opts::{OutputMode, OutputWriter};
use crate::progress_bar::BqProgressBar;

mod cli;
mod cmd;
mod input;
mod logging;
mod opts;
mod progress_bar;

lazy_static! {
    pub(crate) static ref PROGRESS_BAR: BqProgressBar = BqProgressBar::new();
}

fn main() -> anyhow::Result<()> {
    setup_panic!();

    let cli: Cli = Cli::parse();

    if !cli.no_progress {
        PROGRESS_BAR.show();
    }

    init_logging(cli.verbose.log_level_filter()).expect("Could not initialize logging");

    match &cli.command {
        Commands::Compact { input, output } => {
            let reader = input.as_reader()?;
            let output =
                OutputWriter::from_path_and_input(output, &reader, "bubbles", OutputMode::Text)?;

            compact::compact(reader.into_buf_read(), output.into_write())
                .context("Failed to compact given sets")?;
        }
        Commands::Quant {
            ecs,
            targets,
            output,
            bootstraps,
            seed,
            threads,
            fragment_length,
            format,
            compression,
        } => {
            let classes = ecs.as_reader()?;
            let targets = targets.as_reader()?;
            PROGRESS_BAR.set_message("Bootstrapping");

            let options = quant::QuantOptions {
                bootstraps: *bootstraps,
                seed: *seed,
                threads: *threads,
                fragment_length: *fragment_length,
                format: *format,
                compression: *compression,
            };
            quant::quant(
                classes.into_buf_read(),
                targets.into_buf_read(),
                output,
                &options,
                Arc::new(PROGRESS_BAR.clone()),
            )
            .context("Failed to quantify given equivalence classes")?;
        }
        Commands::Lengths {
            targets,
            fragment_length,
            output,
        } => {
            let reader = targets.as_reader()?;
            let output =
                OutputWriter::from_path_and_input(output, &reader, "pwidx", OutputMode::Binary)?;

            lengths::lengths(reader.into_buf_read(), output.into_write(), *fragment_length)
                .context("Failed to compute effective lengths")?;
        }
        Commands::Inspect { input, at, slice } => {
            let reader = input.as_reader()?;

            inspect::inspect(
                reader.into_buf_read(),
                std::io::stdout().lock(),
                *at,
                slice.clone(),
            )
            .context("Failed to inspect given index")?;
        }
    }

    PROGRESS_BAR.finish();
    Ok(())
}
