//! Mock command runner for testing.
//!
//! Returns scripted results without launching anything, and records every
//! call so tests can assert on argument vectors and attempt numbers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::CommandInvocation;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandResult, CommandRunner, NO_EXIT_CODE};

/// Predefined result for one attempt.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Files written into the working directory before returning
    pub writes: Vec<(PathBuf, String)>,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
            duration_ms: 100,
            writes: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
            duration_ms: 100,
            writes: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: NO_EXIT_CODE,
            stdout: String::new(),
            stderr: "killed after exceeding timeout".to_string(),
            timed_out: true,
            duration_ms: 100,
            writes: Vec::new(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Write `contents` to `path` (relative to the working directory) when
    /// this response is served, e.g. to mimic a state file change.
    pub fn writes_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.writes.push((path.into(), contents.into()));
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub attempt: u32,
    pub env: BTreeMap<String, String>,
}

impl CapturedCall {
    pub fn subcommand(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or("")
    }
}

/// Mock runner for testing.
///
/// Responses are served in order and cycle once exhausted; with no
/// responses every call succeeds with empty output.
#[derive(Clone)]
pub struct MockRunner {
    program: PathBuf,
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("terraform"),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
        }
    }

    /// Add a response for a later call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Replace all responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Make every call fail as if the tool could not be launched.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Calls whose first argument is `subcommand`.
    pub fn get_subcommand_calls(&self, subcommand: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.subcommand() == subcommand)
            .cloned()
            .collect()
    }

    pub fn was_called(&self, subcommand: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.subcommand() == subcommand)
    }

    fn next_response(&self) -> MockResponse {
        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses[index % responses.len()].clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, invocation: &CommandInvocation, attempt: u32) -> RunnerResult<CommandResult> {
        self.captured_calls.write().push(CapturedCall {
            arguments: invocation.arguments.clone(),
            working_directory: invocation.working_directory.clone(),
            attempt,
            env: invocation.env.clone(),
        });

        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ToolNotFound(msg));
        }

        let response = self.next_response();
        for (path, contents) in &response.writes {
            std::fs::write(invocation.working_directory.join(path), contents)?;
        }

        Ok(CommandResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            attempt,
            timed_out: response.timed_out,
            started_at: chrono::Utc::now(),
            duration_ms: response.duration_ms,
        })
    }
}
