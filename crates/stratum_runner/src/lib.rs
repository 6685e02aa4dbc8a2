//! # stratum_runner
//!
//! Subprocess execution engine for Stratum.
//!
//! Every call to the external tool goes through this crate. An
//! [`ExecutionEngine`] launches the tool through a [`CommandRunner`],
//! classifies failed attempts with a [`Classifier`] and retries transient
//! failures and timeouts with linear back-off.
//!
//! # Features
//!
//! - **Process Runner**: Timeout-bounded launches with process-group kill
//! - **Concurrent Draining**: stdout and stderr read on independent tasks
//! - **Failure Classification**: Ordered, case-insensitive rule list
//! - **Retry Policy**: `min(cap, attempt * step)` back-off
//! - **Mock Runner**: Scripted results for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stratum_runner::{CommandInvocation, ExecutionEngine, ProcessRunner, RunnerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::new(RunnerConfig::default())?;
//!     let engine = ExecutionEngine::new(Arc::new(runner));
//!
//!     let invocation = CommandInvocation::new("./infra")
//!         .args(["plan", "-input=false", "-no-color"])
//!         .timeout(Duration::from_secs(300));
//!
//!     let outcome = engine.execute(&invocation).await?;
//!     if let Some(message) = outcome.failure_message() {
//!         eprintln!("{}", message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod mock;
pub mod process;
pub mod retry;
pub mod runner;

pub use classify::{standard_rules, ClassificationRule, Classifier, FailureClass};
pub use config::{
    CommandInvocation, RunnerConfig, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, TERRAFORM_LOG_VARS,
};
pub use engine::{AttemptRecord, ExecutionEngine, ExecutionOutcome, STDERR_TAIL_LINES};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::ProcessRunner;
pub use retry::RetryPolicy;
pub use runner::{CommandResult, CommandRunner, LogHandler, LogLine, LogStream, NO_EXIT_CODE};
