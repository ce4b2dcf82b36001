//! Error types for crosscoach-core

use thiserror::Error;

/// Main error type for the crosscoach-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A single log row could not be normalized (skipped and counted)
    #[error("invalid log record for user {user_id}: {message}")]
    InvalidRecord { user_id: String, message: String },

    /// A series pair has zero variance over its overlap (pair skipped)
    #[error("zero variance correlating {series_a} with {series_b}")]
    NumericDegeneracy { series_a: String, series_b: String },

    /// Every fetched row was malformed, leaving nothing to analyze
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Log source could not be read
    #[error("failed to fetch logs: {0}")]
    Fetch(String),

    /// Atomic insight replacement did not commit
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for crosscoach-core
pub type Result<T> = std::result::Result<T, Error>;
