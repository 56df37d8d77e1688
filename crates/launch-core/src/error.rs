//! Error types for launch-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while supervising a service unit
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The inference engine entrypoint is absent. Configuration error,
    /// fatal, never retried.
    #[error("engine entrypoint not found at {0}")]
    EntrypointMissing(PathBuf),

    /// A primary process could not be spawned
    #[error("failed to launch primary process {role}: {source}")]
    PrimarySpawn {
        /// Role of the process that failed to start
        role: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// A service manifest could not be read or parsed
    #[error("invalid manifest {path}: {detail}")]
    InvalidManifest {
        /// Manifest file path
        path: PathBuf,
        /// Parse or IO detail
        detail: String,
    },

    /// Unknown preset name
    #[error("unknown service preset: {0}")]
    UnknownPreset(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for supervision operations
pub type Result<T> = std::result::Result<T, LaunchError>;
