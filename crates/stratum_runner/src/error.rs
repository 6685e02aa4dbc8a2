//! Error types for the runner module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that prevent an attempt from being started at all.
///
/// A subprocess that runs and fails is not an error; it is reported through
/// [`crate::CommandResult`] and [`crate::ExecutionOutcome`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDirectoryMissing(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid classification pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
