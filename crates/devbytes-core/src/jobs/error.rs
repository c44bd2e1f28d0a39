//! Job facility error types.

use thiserror::Error;

/// Errors that can occur in the job registry.
#[derive(Debug, Error)]
pub enum JobError {
    /// Registry file could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Registry file exists but is not valid.
    #[error("corrupt job registry: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Job period must be non-zero and at most `MAX_PERIOD`.
    #[error("invalid period for job '{0}'")]
    InvalidPeriod(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for job facility operations.
pub type Result<T> = std::result::Result<T, JobError>;
