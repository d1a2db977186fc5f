use std::path::PathBuf;
use thiserror::Error;

use super::constants::ATS_HEADER_SIZE;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("header buffer truncated: got {0} bytes, expected {exp}", exp = ATS_HEADER_SIZE)]
    Truncated(usize),
    #[error("mask file {0:?} is shorter than its own header")]
    TruncatedMask(PathBuf),
}

#[derive(Debug, Clone, Error)]
pub enum NotFoundError {
    #[error("station {0} does not exist")]
    Station(String),
    #[error("run {1} does not exist in station {0}")]
    Run(String, usize),
    #[error("run {0:?} is empty")]
    EmptyRun(PathBuf),
}

#[derive(Debug, Clone, Error)]
pub enum ConflictError {
    #[error("station {0} already exists")]
    DuplicateStation(String),
    #[error("sample rate mismatch joining run {run}: expected {expected} got {got}")]
    SampleRateMismatch { run: usize, expected: f64, got: f64 },
    #[error("channel {0} is already bound to {1:?}")]
    PathAlreadyBound(String, PathBuf),
    #[error("survey ingestion is closed; the tree was already built")]
    IngestionClosed,
    #[error("survey tree was already built")]
    TreeAlreadyBuilt,
    #[error("survey tree has not been built yet")]
    TreeNotBuilt,
    #[error("sample rate must be positive, got {0}")]
    BadSampleRate(f64),
}

/// An IO failure wrapped with the offending path.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO error on {path:?}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file {0:?} does not exist")]
    Missing(PathBuf),
}

impl IoError {
    /// Attach the offending path to a raw IO error.
    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Path {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GapError {
    #[error("recordings overlap by {overlap} samples between {prev:?} and {next:?}")]
    Overlap {
        prev: PathBuf,
        next: PathBuf,
        overlap: i64,
    },
}

#[derive(Debug, Error)]
pub enum AtsFileError {
    #[error("ats file failed to decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("ats file failed due to IO error: {0}")]
    Io(#[from] IoError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel failed due to conflict: {0}")]
    Conflict(#[from] ConflictError),
    #[error("channel failed due to IO error: {0}")]
    Io(#[from] IoError),
    #[error("channel failed due to ats file error: {0}")]
    AtsFile(#[from] AtsFileError),
    #[error("could not parse channel filename {0:?}")]
    BadFilename(PathBuf),
    #[error("could not parse datetime {0}")]
    BadDatetime(String),
    #[error("channel sidecar {0:?} failed to parse: {1}")]
    Sidecar(PathBuf, #[source] serde_json::Error),
    #[error("channel {0} has no bound path")]
    Unbound(String),
    #[error("channel {0} has no source recording to materialize from")]
    NoOrigin(String),
}

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("survey failed due to missing entry: {0}")]
    NotFound(#[from] NotFoundError),
    #[error("survey failed due to conflict: {0}")]
    Conflict(#[from] ConflictError),
    #[error("survey failed due to IO error: {0}")]
    Io(#[from] IoError),
    #[error("survey failed due to channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("survey root {0:?} cannot be used: parent directory does not exist")]
    BadRoot(PathBuf),
    #[error("no path was created for channel {0}")]
    UnboundChannel(String),
}

#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("concatenation received an empty input list")]
    NoInputs,
    #[error("inputs are not simply concatenable: {0}")]
    NotConcatenable(String),
    #[error("concatenation failed due to gap error: {0}")]
    Gap(#[from] GapError),
    #[error("concatenation failed due to ats file error: {0}")]
    AtsFile(#[from] AtsFileError),
    #[error("concatenation failed due to IO error: {0}")]
    Io(#[from] IoError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor failed due to survey error: {0}")]
    Survey(#[from] SurveyError),
    #[error("processor failed due to concatenation error: {0}")]
    Concat(#[from] ConcatError),
    #[error("processor failed due to channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("processor failed due to ats file error: {0}")]
    AtsFile(#[from] AtsFileError),
    #[error("processor failed due to config error: {0}")]
    Config(#[from] ConfigError),
    #[error("processor failed due to IO error: {0}")]
    Io(#[from] IoError),
    #[error("processor failed due to send error: {0}")]
    Send(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("processor found no ats files under {0:?}")]
    NoInputFiles(PathBuf),
    #[error("no cat output path configured")]
    NoCatPath,
}
