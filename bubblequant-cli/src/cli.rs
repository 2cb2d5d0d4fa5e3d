use std::ops::Range;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::cmd::quant::OutputFormat;
use crate::opts::{input_file, input_stream, position_range, InputFile, InputStream};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Don't display a progress bar/spinner
    #[clap(long, global = true, value_parser)]
    pub no_progress: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split sets of elements into their smallest common fragments (bubbles)
    /// and rewrite every set as a list of bubbles
    Compact {
        /// Input file with one whitespace-separated set per line; `-` is the
        /// standard input
        #[clap(default_value_t, value_parser = input_stream)]
        input: InputStream,

        /// Output file path; `-` is the standard output
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Estimate target abundances from equivalence class counts and
    /// bootstrap the estimate
    Quant {
        /// Equivalence classes file (`count<TAB>target,target,...`)
        #[clap(long, value_parser = input_file)]
        ecs: InputFile,

        /// Targets file (`name<TAB>length`)
        #[clap(long, value_parser = input_file)]
        targets: InputFile,

        /// Output directory path
        #[clap(short, long, value_parser)]
        output: PathBuf,

        /// Number of bootstrap samples to draw
        #[clap(short, long, default_value_t = 0, value_parser)]
        bootstraps: usize,

        /// Seed used to derive the seed of every bootstrap
        #[clap(long, default_value_t = 42, value_parser)]
        seed: u64,

        /// Number of additional threads to spawn
        #[clap(long, value_parser)]
        threads: Option<usize>,

        /// Mean fragment length used to compute effective target lengths
        #[clap(short, long, value_parser)]
        fragment_length: Option<f64>,

        /// Output format
        #[clap(arg_enum, long, default_value_t = OutputFormat::Tsv, value_parser)]
        format: OutputFormat,

        /// Gzip compression level of the TSV files (1 - fast, 9 - best)
        #[clap(long, value_parser = clap::value_parser!(u32).range(1..=9))]
        compression: Option<u32>,
    },

    /// Compute effective target lengths and store them as a piecewise index
    Lengths {
        /// Targets file (`name<TAB>length`); `-` is the standard input
        #[clap(long, default_value_t, value_parser = input_stream)]
        targets: InputStream,

        /// Mean fragment length
        #[clap(short, long, value_parser)]
        fragment_length: f64,

        /// Output file path; `-` is the standard output
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Print the contents of a piecewise index file
    Inspect {
        /// Input index file; `-` is the standard input
        #[clap(default_value_t, value_parser = input_stream)]
        input: InputStream,

        /// Print only the value at given position
        #[clap(long, value_parser, conflicts_with = "slice")]
        at: Option<u64>,

        /// Print only the intervals within given `LO:HI` range, rebased to 0
        #[clap(long, value_parser = position_range)]
        slice: Option<Range<u64>>,
    },
}
