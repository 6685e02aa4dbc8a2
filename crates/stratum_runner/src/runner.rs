//! Command runner trait and result types.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CommandInvocation;
use crate::error::RunnerResult;

/// Exit code recorded for attempts that never produced one.
pub const NO_EXIT_CODE: i32 = -1;

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code, `-1` when killed or terminated by a signal
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// 1-based attempt that produced this result
    pub attempt: u32,
    /// Whether the attempt was killed by the timeout
    pub timed_out: bool,
    /// When the process was launched
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            attempt: 1,
            timed_out: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Result of an attempt that was killed after its time bound.
    pub fn from_timeout(attempt: u32, stderr: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_code: NO_EXIT_CODE,
            stdout: String::new(),
            stderr: stderr.into(),
            attempt,
            timed_out: true,
            started_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Exit code 0 and not killed.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Last `lines` lines of stderr.
    pub fn stderr_tail(&self, lines: usize) -> String {
        tail_lines(&self.stderr, lines)
    }
}

pub(crate) fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Output stream of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of child output.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub attempt: u32,
    pub message: String,
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Something that can launch the tool once.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executable this runner launches.
    fn program(&self) -> &Path;

    /// Run a single attempt of `invocation`.
    ///
    /// Only conditions that make launching impossible are errors; a process
    /// that exits non-zero or times out is an `Ok` result.
    async fn run(&self, invocation: &CommandInvocation, attempt: u32) -> RunnerResult<CommandResult>;
}
