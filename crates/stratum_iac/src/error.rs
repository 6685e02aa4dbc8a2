//! Error types for IaC module.

use std::path::PathBuf;

use thiserror::Error;

use stratum_runner::FailureClass;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur during IaC operations.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Runner error: {0}")]
    Runner(#[from] stratum_runner::RunnerError),

    #[error("Failed to back up {}: {source}", .path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("terraform {operation} failed ({class}) after {attempts} attempt(s): {message}")]
    OperationFailed {
        operation: String,
        class: FailureClass,
        attempts: u32,
        message: String,
    },

    #[error("terraform {operation} failed and state rollback also failed: {rollback} (original failure: {original})")]
    RollbackFailed {
        operation: String,
        original: String,
        rollback: String,
    },

    #[error("Invalid terraform output: {0}")]
    InvalidOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
