use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::bootstrap::estimator::Estimate;
use crate::bootstrap::model::ModelInputs;

/// Error occurring when writing bootstrap results.
#[derive(Debug)]
pub enum BootstrapWriterError {
    /// Results were written before [`BootstrapWriter::init`].
    NotInitialized,
    /// The estimate does not have one value per target.
    DimensionMismatch { expected: usize, actual: usize },
    IoError(std::io::Error),
    EncodeError(rmp_serde::encode::Error),
    DecodeError(rmp_serde::decode::Error),
    JsonError(serde_json::Error),
}

impl From<std::io::Error> for BootstrapWriterError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<rmp_serde::encode::Error> for BootstrapWriterError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::EncodeError(e)
    }
}

impl From<rmp_serde::decode::Error> for BootstrapWriterError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::DecodeError(e)
    }
}

impl From<serde_json::Error> for BootstrapWriterError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonError(e)
    }
}

impl Display for BootstrapWriterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapWriterError::NotInitialized => write!(f, "Writer has not been initialized"),
            BootstrapWriterError::DimensionMismatch { expected, actual } => write!(
                f,
                "Estimate has {} targets, expected {}",
                actual, expected
            ),
            BootstrapWriterError::IoError(e) => write!(f, "IO error: {}", e),
            BootstrapWriterError::EncodeError(e) => write!(f, "Encode error: {}", e),
            BootstrapWriterError::DecodeError(e) => write!(f, "Decode error: {}", e),
            BootstrapWriterError::JsonError(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl Error for BootstrapWriterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BootstrapWriterError::IoError(e) => Some(e),
            BootstrapWriterError::EncodeError(e) => Some(e),
            BootstrapWriterError::DecodeError(e) => Some(e),
            BootstrapWriterError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

pub type BootstrapWriteResult<T> = Result<T, BootstrapWriterError>;

/// Metadata describing a quantification run, written once before any
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub num_targets: usize,
    pub num_bootstraps: usize,
    pub num_processed: u64,
    pub fragment_length_distribution: Vec<u32>,
    pub pre_bias: Vec<u32>,
    pub post_bias: Vec<f64>,
    pub index_version: u64,
    pub call: String,
    pub start_time: String,
}

impl RunMetadata {
    #[must_use]
    pub fn new(inputs: &ModelInputs, true_counts: &[u32], num_bootstraps: usize) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            num_targets: inputs.num_targets(),
            num_bootstraps,
            num_processed: true_counts.iter().map(|&x| u64::from(x)).sum(),
            fragment_length_distribution: inputs.fragment_length_distribution().to_vec(),
            pre_bias: Vec::new(),
            post_bias: Vec::new(),
            index_version: 0,
            call: String::new(),
            start_time: String::new(),
        }
    }

    #[must_use]
    pub fn with_call<S: Into<String>>(mut self, call: S) -> Self {
        self.call = call.into();
        self
    }

    #[must_use]
    pub fn with_start_time<S: Into<String>>(mut self, start_time: S) -> Self {
        self.start_time = start_time.into();
        self
    }

    #[must_use]
    pub fn with_bias(mut self, pre_bias: Vec<u32>, post_bias: Vec<f64>) -> Self {
        self.pre_bias = pre_bias;
        self.post_bias = post_bias;
        self
    }

    #[must_use]
    pub fn with_index_version(mut self, index_version: u64) -> Self {
        self.index_version = index_version;
        self
    }
}

/// Sequential sink for quantification results.
///
/// Calls are never made concurrently; implementations do not need to be
/// thread-safe beyond being [`Send`].
pub trait BootstrapWriter: Send {
    fn init(&mut self, metadata: &RunMetadata) -> BootstrapWriteResult<()>;

    /// Writes the point estimate, keyed by target names and lengths.
    fn write_main(
        &mut self,
        estimate: &Estimate,
        target_names: &[String],
        lengths: &[u32],
    ) -> BootstrapWriteResult<()>;

    fn write_bootstrap(&mut self, estimate: &Estimate, bs_id: usize) -> BootstrapWriteResult<()>;
}

fn write_run_info<W: Write>(mut writer: W, metadata: &RunMetadata) -> BootstrapWriteResult<()> {
    serde_json::to_writer_pretty(&mut writer, metadata)?;
    writer.flush()?;

    Ok(())
}

fn check_dimension(expected: Option<usize>, estimate: &Estimate) -> BootstrapWriteResult<()> {
    match expected {
        Some(expected) if expected != estimate.num_targets() => {
            Err(BootstrapWriterError::DimensionMismatch {
                expected,
                actual: estimate.num_targets(),
            })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MainResult {
    pub target_names: Vec<String>,
    pub lengths: Vec<u32>,
    pub estimate: Estimate,
}

/// Keeps every result in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBootstrapWriter {
    metadata: Option<RunMetadata>,
    main: Option<MainResult>,
    bootstraps: BTreeMap<usize, Estimate>,
}

impl MemoryBootstrapWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&RunMetadata> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn main(&self) -> Option<&MainResult> {
        self.main.as_ref()
    }

    /// Bootstrap results, ordered by bootstrap id.
    #[must_use]
    pub fn bootstraps(&self) -> &BTreeMap<usize, Estimate> {
        &self.bootstraps
    }

    #[must_use]
    pub fn into_bootstraps(self) -> BTreeMap<usize, Estimate> {
        self.bootstraps
    }
}

impl BootstrapWriter for MemoryBootstrapWriter {
    fn init(&mut self, metadata: &RunMetadata) -> BootstrapWriteResult<()> {
        self.metadata = Some(metadata.clone());
        Ok(())
    }

    fn write_main(
        &mut self,
        estimate: &Estimate,
        target_names: &[String],
        lengths: &[u32],
    ) -> BootstrapWriteResult<()> {
        check_dimension(Some(target_names.len()), estimate)?;

        self.main = Some(MainResult {
            target_names: target_names.to_vec(),
            lengths: lengths.to_vec(),
            estimate: estimate.clone(),
        });
        Ok(())
    }

    fn write_bootstrap(&mut self, estimate: &Estimate, bs_id: usize) -> BootstrapWriteResult<()> {
        let expected = self.metadata.as_ref().map(|metadata| metadata.num_targets);
        check_dimension(expected, estimate)?;

        self.bootstraps.insert(bs_id, estimate.clone());
        Ok(())
    }
}

pub const RUN_INFO_FILE: &str = "run_info.json";
pub const ABUNDANCE_FILE: &str = "abundance.tsv";

/// Writes a directory of tab-separated files: `run_info.json`,
/// `abundance.tsv` and one `bs_abundance_<id>.tsv` per bootstrap.
///
/// With compression enabled, the TSV files are gzipped and get a `.gz`
/// suffix.
#[derive(Debug)]
pub struct TsvBootstrapWriter {
    directory: PathBuf,
    compression: Option<Compression>,
    num_targets: Option<usize>,
    target_names: Vec<String>,
}

impl TsvBootstrapWriter {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            compression: None,
            num_targets: None,
            target_names: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Some(Compression::new(level.min(9)));
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a TSV file in the output directory.
    #[must_use]
    pub fn tsv_path(&self, file_name: &str) -> PathBuf {
        match self.compression {
            Some(_) => self.directory.join(format!("{}.gz", file_name)),
            None => self.directory.join(file_name),
        }
    }

    #[must_use]
    pub fn bootstrap_file_name(bs_id: usize) -> String {
        format!("bs_abundance_{}.tsv", bs_id)
    }

    fn write_tsv<F>(&self, file_name: &str, write_rows: F) -> BootstrapWriteResult<()>
    where
        F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
    {
        let path = self.tsv_path(file_name);
        let file = BufWriter::new(File::create(&path)?);

        match self.compression {
            Some(level) => {
                let mut encoder = GzEncoder::new(file, level);
                write_rows(&mut encoder)?;
                encoder.finish()?.flush()?;
            }
            None => {
                let mut file = file;
                write_rows(&mut file)?;
                file.flush()?;
            }
        }

        debug!("Written {}", path.display());
        Ok(())
    }

    fn target_name(&self, index: usize) -> String {
        self.target_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }
}

impl BootstrapWriter for TsvBootstrapWriter {
    fn init(&mut self, metadata: &RunMetadata) -> BootstrapWriteResult<()> {
        std::fs::create_dir_all(&self.directory)?;

        let file = BufWriter::new(File::create(self.directory.join(RUN_INFO_FILE))?);
        write_run_info(file, metadata)?;
        self.num_targets = Some(metadata.num_targets);

        Ok(())
    }

    fn write_main(
        &mut self,
        estimate: &Estimate,
        target_names: &[String],
        lengths: &[u32],
    ) -> BootstrapWriteResult<()> {
        if self.num_targets.is_none() {
            return Err(BootstrapWriterError::NotInitialized);
        }
        check_dimension(self.num_targets, estimate)?;
        check_dimension(Some(target_names.len()), estimate)?;

        let tpm = estimate.tpm();
        self.write_tsv(ABUNDANCE_FILE, |writer| {
            writeln!(writer, "target_id\tlength\test_counts\ttpm")?;
            for (i, name) in target_names.iter().enumerate() {
                let length = lengths.get(i).copied().unwrap_or_default();
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}",
                    name, length, estimate.alpha[i], tpm[i]
                )?;
            }
            Ok(())
        })?;
        self.target_names = target_names.to_vec();

        Ok(())
    }

    fn write_bootstrap(&mut self, estimate: &Estimate, bs_id: usize) -> BootstrapWriteResult<()> {
        if self.num_targets.is_none() {
            return Err(BootstrapWriterError::NotInitialized);
        }
        check_dimension(self.num_targets, estimate)?;

        let tpm = estimate.tpm();
        self.write_tsv(&Self::bootstrap_file_name(bs_id), |writer| {
            writeln!(writer, "target_id\test_counts\ttpm")?;
            for (i, alpha) in estimate.alpha.iter().enumerate() {
                writeln!(writer, "{}\t{}\t{}", self.target_name(i), alpha, tpm[i])?;
            }
            Ok(())
        })
    }
}

/// A record of a [`MsgpackBootstrapWriter`] stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BootstrapRecord {
    Info(RunMetadata),
    Main {
        target_names: Vec<String>,
        lengths: Vec<u32>,
        estimate: Estimate,
    },
    Bootstrap {
        id: usize,
        estimate: Estimate,
    },
}

/// Writes all results as a stream of MessagePack-encoded
/// [`BootstrapRecord`]s.
#[derive(Debug)]
pub struct MsgpackBootstrapWriter<W> {
    writer: W,
    num_targets: Option<usize>,
}

impl<W: Write + Send> MsgpackBootstrapWriter<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            num_targets: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &BootstrapRecord) -> BootstrapWriteResult<()> {
        record.serialize(&mut rmp_serde::Serializer::new(&mut self.writer))?;
        self.writer.flush()?;

        Ok(())
    }
}

impl<W: Write + Send> BootstrapWriter for MsgpackBootstrapWriter<W> {
    fn init(&mut self, metadata: &RunMetadata) -> BootstrapWriteResult<()> {
        self.write_record(&BootstrapRecord::Info(metadata.clone()))?;
        self.num_targets = Some(metadata.num_targets);

        Ok(())
    }

    fn write_main(
        &mut self,
        estimate: &Estimate,
        target_names: &[String],
        lengths: &[u32],
    ) -> BootstrapWriteResult<()> {
        if self.num_targets.is_none() {
            return Err(BootstrapWriterError::NotInitialized);
        }
        check_dimension(self.num_targets, estimate)?;
        check_dimension(Some(target_names.len()), estimate)?;

        self.write_record(&BootstrapRecord::Main {
            target_names: target_names.to_vec(),
            lengths: lengths.to_vec(),
            estimate: estimate.clone(),
        })
    }

    fn write_bootstrap(&mut self, estimate: &Estimate, bs_id: usize) -> BootstrapWriteResult<()> {
        if self.num_targets.is_none() {
            return Err(BootstrapWriterError::NotInitialized);
        }
        check_dimension(self.num_targets, estimate)?;

        self.write_record(&BootstrapRecord::Bootstrap {
            id: bs_id,
            estimate: estimate.clone(),
        })
    }
}

/// Reads back the records of a [`MsgpackBootstrapWriter`] stream.
#[derive(Debug)]
pub struct MsgpackRecordReader<R> {
    reader: R,
}

impl<R: BufRead> MsgpackRecordReader<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_record(&mut self) -> BootstrapWriteResult<Option<BootstrapRecord>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let record = rmp_serde::from_read(&mut self.reader)?;
        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for MsgpackRecordReader<R> {
    type Item = BootstrapWriteResult<BootstrapRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{self, BufWriter, Read, Write};

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use crate::_internal_test_data::SMALL_INPUTS;
    use crate::bootstrap::estimator::Estimate;
    use crate::bootstrap::writer::{
        write_run_info, BootstrapRecord, BootstrapWriter, BootstrapWriterError,
        MemoryBootstrapWriter, MsgpackBootstrapWriter, MsgpackRecordReader, RunMetadata,
        TsvBootstrapWriter,
    };

    /// Sink with no space left.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn estimate(alpha: Vec<f64>) -> Estimate {
        let total: f64 = alpha.iter().sum();
        let rho = alpha.iter().map(|x| x / total).collect();

        Estimate {
            alpha,
            rho,
            rounds: 1,
            converged: true,
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata::new(&SMALL_INPUTS, &[10, 20, 30, 40], 2).with_call("bubblequant quant")
    }

    #[test]
    fn test_run_metadata() {
        let metadata = metadata();

        assert_eq!(metadata.num_targets, 3);
        assert_eq!(metadata.num_bootstraps, 2);
        assert_eq!(metadata.num_processed, 100);
        assert_eq!(metadata.call, "bubblequant quant");
        assert_eq!(metadata.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_memory_writer() {
        let mut writer = MemoryBootstrapWriter::new();
        writer.init(&metadata()).unwrap();
        writer
            .write_main(
                &estimate(vec![1.0, 2.0, 3.0]),
                SMALL_INPUTS.target_names(),
                SMALL_INPUTS.target_lengths(),
            )
            .unwrap();
        writer
            .write_bootstrap(&estimate(vec![3.0, 2.0, 1.0]), 1)
            .unwrap();
        writer
            .write_bootstrap(&estimate(vec![2.0, 2.0, 2.0]), 0)
            .unwrap();

        assert_eq!(writer.metadata().unwrap().num_bootstraps, 2);
        assert_eq!(writer.main().unwrap().lengths, SMALL_INPUTS.target_lengths());
        assert_eq!(
            writer.bootstraps().keys().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_memory_writer_dimension_mismatch() {
        let mut writer = MemoryBootstrapWriter::new();
        writer.init(&metadata()).unwrap();

        let result = writer.write_bootstrap(&estimate(vec![1.0]), 0);
        assert!(matches!(
            result,
            Err(BootstrapWriterError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_tsv_writer() {
        let dir = TempDir::new().unwrap();
        let mut writer = TsvBootstrapWriter::new(dir.path());
        writer.init(&metadata()).unwrap();
        writer
            .write_main(
                &estimate(vec![1.0, 1.0, 2.0]),
                SMALL_INPUTS.target_names(),
                SMALL_INPUTS.target_lengths(),
            )
            .unwrap();
        writer
            .write_bootstrap(&estimate(vec![2.0, 1.0, 1.0]), 7)
            .unwrap();

        let run_info: RunMetadata =
            serde_json::from_str(&fs::read_to_string(dir.path().join("run_info.json")).unwrap())
                .unwrap();
        assert_eq!(run_info, metadata());

        let abundance = fs::read_to_string(dir.path().join("abundance.tsv")).unwrap();
        let lines: Vec<&str> = abundance.lines().collect();
        assert_eq!(lines[0], "target_id\tlength\test_counts\ttpm");
        assert_eq!(lines[3], "t2\t300\t2\t500000");

        let bootstrap = fs::read_to_string(dir.path().join("bs_abundance_7.tsv")).unwrap();
        assert_eq!(bootstrap.lines().nth(1), Some("t0\t2\t500000"));
    }

    #[test]
    fn test_tsv_writer_gzip() {
        let dir = TempDir::new().unwrap();
        let mut writer = TsvBootstrapWriter::new(dir.path()).with_compression(6);
        writer.init(&metadata()).unwrap();
        writer
            .write_bootstrap(&estimate(vec![1.0, 1.0, 2.0]), 0)
            .unwrap();

        let path = writer.tsv_path(&TsvBootstrapWriter::bootstrap_file_name(0));
        assert!(path.ends_with("bs_abundance_0.tsv.gz"));

        let mut contents = String::new();
        GzDecoder::new(fs::File::open(path).unwrap())
            .read_to_string(&mut contents)
            .unwrap();
        // no main result written, so targets are named by index
        assert_eq!(contents.lines().nth(3), Some("2\t2\t500000"));
    }

    #[test]
    fn test_tsv_writer_not_initialized() {
        let dir = TempDir::new().unwrap();
        let mut writer = TsvBootstrapWriter::new(dir.path());

        let result = writer.write_bootstrap(&estimate(vec![1.0, 1.0, 2.0]), 0);
        assert!(matches!(result, Err(BootstrapWriterError::NotInitialized)));
    }

    #[test]
    fn test_msgpack_writer() {
        let mut writer = MsgpackBootstrapWriter::new(Vec::new());
        writer.init(&metadata()).unwrap();
        writer
            .write_main(
                &estimate(vec![1.0, 2.0, 3.0]),
                SMALL_INPUTS.target_names(),
                SMALL_INPUTS.target_lengths(),
            )
            .unwrap();
        writer
            .write_bootstrap(&estimate(vec![3.0, 2.0, 1.0]), 5)
            .unwrap();
        let data = writer.into_inner();

        let records: Vec<BootstrapRecord> = MsgpackRecordReader::new(data.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], BootstrapRecord::Info(metadata()));
        assert!(matches!(
            &records[1],
            BootstrapRecord::Main { target_names, .. } if target_names == SMALL_INPUTS.target_names()
        ));
        assert_eq!(
            records[2],
            BootstrapRecord::Bootstrap {
                id: 5,
                estimate: estimate(vec![3.0, 2.0, 1.0])
            }
        );
    }

    #[test]
    fn test_msgpack_reader_truncated() {
        let mut writer = MsgpackBootstrapWriter::new(Vec::new());
        writer.init(&metadata()).unwrap();
        let mut data = writer.into_inner();
        data.truncate(data.len() - 3);

        let mut reader = MsgpackRecordReader::new(data.as_slice());
        assert!(matches!(
            reader.next(),
            Some(Err(BootstrapWriterError::DecodeError(_)))
        ));
    }

    #[test]
    fn test_run_info_buffered_write_error() {
        // fits in the buffer, so the error only shows up when flushing
        let result = write_run_info(BufWriter::new(FullDisk), &metadata());

        assert!(matches!(result, Err(BootstrapWriterError::IoError(_))));
    }

    #[test]
    fn test_msgpack_writer_target_names_mismatch() {
        let mut writer = MsgpackBootstrapWriter::new(Vec::new());
        writer.init(&metadata()).unwrap();

        let result = writer.write_main(
            &estimate(vec![1.0, 2.0, 3.0]),
            &SMALL_INPUTS.target_names()[..2],
            SMALL_INPUTS.target_lengths(),
        );
        assert!(matches!(
            result,
            Err(BootstrapWriterError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }
}
