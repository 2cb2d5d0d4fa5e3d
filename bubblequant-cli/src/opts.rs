use std::fmt::Display;
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use atty::Stream;
use log::info;

#[derive(Debug, Clone)]
pub struct InputFile {
    path: PathBuf,
}

impl Display for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub fn input_file(path: &str) -> Result<InputFile, String> {
    let path = Path::new(path);
    if path.to_string_lossy() == "-" {
        return Err("standard input is not supported here".to_owned());
    }

    Ok(InputFile {
        path: path.to_path_buf(),
    })
}

impl InputFile {
    pub fn as_reader(&self) -> anyhow::Result<InputReader> {
        InputReader::from_path(&self.path)
            .with_context(|| format!("Could not open {}", self.path.display()))
    }
}

pub fn input_stream(path: &str) -> Result<InputStream, String> {
    Ok(InputStream {
        path: PathBuf::from(path),
    })
}

#[derive(Debug, Clone)]
pub struct InputStream {
    path: PathBuf,
}

impl Display for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl Default for InputStream {
    fn default() -> Self {
        Self {
            path: PathBuf::from("-"),
        }
    }
}

impl InputStream {
    pub fn as_reader(&self) -> anyhow::Result<InputReader> {
        InputReader::from_path(&self.path)
            .with_context(|| format!("Could not open {}", self.path.display()))
    }
}

#[derive(Debug)]
pub enum InputReader {
    Stdin(io::Stdin),
    File { file: File, path: PathBuf },
}

impl InputReader {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        let is_stdin = path.to_string_lossy() == "-";

        let val = if is_stdin {
            Self::Stdin(io::stdin())
        } else {
            let file = File::open(path)?;

            Self::File {
                file,
                path: path.to_owned(),
            }
        };
        Ok(val)
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            InputReader::Stdin(_) => None,
            InputReader::File { path, .. } => Some(path),
        }
    }

    #[must_use]
    pub fn into_buf_read(self) -> Box<dyn BufRead + Send> {
        match self {
            InputReader::Stdin(stdin) => Box::new(BufReader::new(stdin)),
            InputReader::File { file, .. } => Box::new(BufReader::new(file)),
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum OutputMode {
    Text,
    Binary,
}

#[derive(Debug)]
pub enum OutputWriter {
    Stdout(io::Stdout),
    File(File),
}

impl OutputWriter {
    pub fn from_path_and_input(
        output: &Option<PathBuf>,
        input: &InputReader,
        new_extension: &str,
        mode: OutputMode,
    ) -> anyhow::Result<Self> {
        if let Some(path) = output {
            Self::from_path(path, mode)
        } else {
            let path = input
                .file_path()
                .map(|path| path.with_extension(new_extension))
                .unwrap_or_else(|| PathBuf::from("-"));

            Self::from_path(&path, mode)
        }
    }

    fn from_path(path: &Path, mode: OutputMode) -> anyhow::Result<Self> {
        info!("Output file: {}", path.display());

        let is_stdout = path.to_string_lossy() == "-";

        if mode == OutputMode::Binary && is_stdout && atty::is(Stream::Stdout) {
            bail!("Cannot output binary file to stdout when running in terminal; please use -o option instead or pipe the standard output");
        }

        let writer = if is_stdout {
            Self::Stdout(io::stdout())
        } else {
            let file = File::create(path)
                .with_context(|| format!("Could not create {}", path.display()))?;
            Self::File(file)
        };

        Ok(writer)
    }

    pub fn into_write(self) -> Box<dyn Write + Send> {
        match self {
            OutputWriter::Stdout(stdout) => Box::new(stdout),
            OutputWriter::File(file) => Box::new(file),
        }
    }
}

/// Parses a `LO:HI` position range.
pub fn position_range(value: &str) -> Result<Range<u64>, String> {
    let (lower, upper) = value
        .split_once(':')
        .ok_or_else(|| format!("expected LO:HI, got `{}`", value))?;
    let lower: u64 = lower
        .trim()
        .parse()
        .map_err(|e| format!("invalid lower bound `{}`: {}", lower, e))?;
    let upper: u64 = upper
        .trim()
        .parse()
        .map_err(|e| format!("invalid upper bound `{}`: {}", upper, e))?;

    if lower >= upper {
        return Err(format!("empty range {}:{}", lower, upper));
    }

    Ok(lower..upper)
}
