use std::path::PathBuf;
use thiserror::Error;

/// Per-symbol failures. These never abort a batch: the caller logs them and
/// moves on to the next symbol.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The series for this symbol has no bars.
    #[error("no data for {0}")]
    NoData(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration file exists but cannot be parsed.
    #[error("invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// No raw data is available for any symbol.
    #[error("no input data found in {0}")]
    NoInputData(PathBuf),

    /// The report stage found nothing to aggregate.
    #[error("no processed data found in {0}")]
    NoProcessedData(PathBuf),
}

/// Errors raised while talking to the market data provider.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limited by provider (status {0})")]
    RateLimited(u16),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("provider error: {0}")]
    Api(String),

    /// The provider answered but had no usable bars.
    #[error("no bars returned for {0}")]
    Empty(String),
}
