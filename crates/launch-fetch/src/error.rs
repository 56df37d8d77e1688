//! Error types for launch-fetch

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while fetching a model asset
#[derive(Error, Debug)]
pub enum FetchError {
    /// Download tool not installed on the host
    #[error("{0} is not installed or not in PATH")]
    ToolUnavailable(String),

    /// Download tool ran but exited non-zero
    #[error("{tool} failed with exit code {code}: {detail}")]
    ToolFailed {
        /// Tool name (aria2c, axel)
        tool: String,
        /// Exit code (-1 when killed by signal)
        code: i32,
        /// Tail of the tool's stderr
        detail: String,
    },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("HTTP status {0} for {1}")]
    HttpStatus(u16, String),

    /// Transfer exceeded its overall time budget
    #[error("transfer timed out after {0} seconds")]
    TransferTimeout(u64),

    /// Downloaded file is smaller than the minimum plausible size
    #[error("downloaded file {path} is only {bytes} bytes, treating as truncated")]
    Truncated {
        /// Path of the suspect file
        path: PathBuf,
        /// Observed size
        bytes: u64,
    },

    /// No strategy in the chain was available on this host
    #[error("no download strategy available")]
    NoStrategyAvailable,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err.to_string())
    }
}

/// Result alias for fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;
