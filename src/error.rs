use thiserror::Error;

/// Errors that can occur while loading data, sampling, or training.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV parse error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Config could not be read or written.
    #[error("Config error: {0}")]
    Config(String),
    /// Malformed or inconsistent dataset.
    #[error("Dataset error: {0}")]
    Dataset(String),
    /// Malformed graph (index out of range, mismatched edge arrays).
    #[error("Graph error: {0}")]
    Graph(String),
    /// Model record could not be saved or loaded.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
    /// Tensor data could not be read back on the host.
    #[error("Tensor error: {0}")]
    Tensor(String),
    /// Chart rendering failed.
    #[error("Plot error: {0}")]
    Plot(String),
}

/// Result type alias for sage-contrast.
pub type Result<T> = std::result::Result<T, Error>;
