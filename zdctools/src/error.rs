//! Error type shared by the ZDC processing stages.
//!
//! Configuration errors are fatal for the processing unit that hits them:
//! the caller logs and aborts that input. Malformed events are not errors,
//! they are logged and skipped where they are found.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZdcError>;

#[derive(Error, Debug)]
pub enum ZdcError {
    #[error("Missing ModuleConfig configuration object")]
    MissingModuleConfig,

    #[error("Missing SimCondition configuration object")]
    MissingSimCondition,

    #[error("Bunch crossing map is not initialized")]
    EmptyBunchesUninitialized,

    #[error("Missing InterCalibConfig configuration object")]
    MissingInterCalibConfig,

    #[error("Unknown calorimeter group {0}")]
    UnknownGroup(usize),

    #[error("Histogram binning mismatch: {0}")]
    BinningMismatch(String),

    #[error("Not recognized histogram name: {0}")]
    UnknownHistogram(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Malformed payload: {0}")]
    Payload(String),
}
