//! Subprocess runner for the real tool.
//!
//! Each attempt launches the executable in its own process group, drains
//! stdout and stderr on two independent tasks, and kills the whole group if
//! the attempt outlives its timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{CommandInvocation, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandResult, CommandRunner, LogHandler, LogLine, LogStream, NO_EXIT_CODE};

/// How long to wait for the output readers once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Variables kept when the environment is not inherited.
const BASE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "TMPDIR", "TEMP", "TMP", "SYSTEMROOT"];

/// Runner that launches the tool as a child process.
pub struct ProcessRunner {
    program: PathBuf,
    config: RunnerConfig,
    log_handler: Option<LogHandler>,
}

impl ProcessRunner {
    /// Create a runner, resolving the executable once.
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let program = Self::resolve_program(&config)?;
        info!("Using {} at {}", config.program, program.display());

        Ok(Self {
            program,
            config,
            log_handler: None,
        })
    }

    /// Set a log handler for streamed output lines.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Locate the executable: the configured path if any, else a PATH search.
    pub fn resolve_program(config: &RunnerConfig) -> RunnerResult<PathBuf> {
        match &config.program_path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(RunnerError::ToolNotFound(path.display().to_string())),
            None => which::which(&config.program)
                .map_err(|_| RunnerError::ToolNotFound(config.program.clone())),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn build_command(&self, invocation: &CommandInvocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&invocation.arguments)
            .current_dir(&invocation.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.config.inherit_env {
            cmd.env_clear();
            for var in BASE_ENV_VARS {
                if let Ok(value) = std::env::var(var) {
                    cmd.env(var, value);
                }
            }
        }

        for var in &self.config.passthrough_env {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }

        for (key, value) in self.config.env.iter().chain(invocation.env.iter()) {
            cmd.env(key, value);
        }

        // Own process group, so a timeout can take down provider plugins too.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Format command for logging.
    fn format_command(&self, args: &[String]) -> String {
        let mut cmd = self.program.display().to_string();
        for arg in args {
            if arg.contains(' ') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }

    fn spawn_reader<R>(
        &self,
        source: R,
        stream: LogStream,
        attempt: u32,
        buffer: Arc<Mutex<String>>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stream_output = self.config.stream_output;
        let log_handler = self.log_handler.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(source);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim_end_matches(['\n', '\r']);
                        {
                            let mut buf = buffer.lock();
                            buf.push_str(line);
                            buf.push('\n');
                        }
                        if stream_output {
                            debug!(%stream, attempt, "{}", line);
                            if let Some(handler) = &log_handler {
                                handler(LogLine {
                                    timestamp: Utc::now(),
                                    stream,
                                    attempt,
                                    message: line.to_string(),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%stream, "Stopped reading child output: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

/// Kill the child and everything in its process group, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }

    if let Err(e) = child.kill().await {
        debug!("Child already gone after group kill: {}", e);
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child leads its own group, so its pgid is its pid.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!(
            pid,
            "Process group kill failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Wait for a reader to finish, giving up after the grace period.
async fn drain(handle: Option<JoinHandle<()>>, stream: LogStream) {
    let Some(mut handle) = handle else {
        return;
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
        warn!(%stream, "Output still open after child exit, abandoning reader");
        handle.abort();
    }
}

fn take_buffer(buffer: &Arc<Mutex<String>>) -> String {
    std::mem::take(&mut *buffer.lock())
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, invocation: &CommandInvocation, attempt: u32) -> RunnerResult<CommandResult> {
        if !invocation.working_directory.is_dir() {
            return Err(RunnerError::WorkingDirectoryMissing(
                invocation.working_directory.clone(),
            ));
        }

        let mut cmd = self.build_command(invocation);
        debug!(
            attempt,
            dir = %invocation.working_directory.display(),
            "Executing: {}",
            self.format_command(&invocation.arguments)
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            program: self.program.display().to_string(),
            source,
        })?;

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|out| self.spawn_reader(out, LogStream::Stdout, attempt, stdout_buf.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| self.spawn_reader(err, LogStream::Stderr, attempt, stderr_buf.clone()));

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (status.code().unwrap_or(NO_EXIT_CODE), false),
            Ok(Err(e)) => {
                error!("Failed to wait for {}: {}", invocation.operation_name(), e);
                terminate(&mut child).await;
                drain(stdout_task, LogStream::Stdout).await;
                drain(stderr_task, LogStream::Stderr).await;
                return Err(RunnerError::Io(e));
            }
            Err(_) => {
                warn!(
                    attempt,
                    "{} exceeded {:?}, killing process group",
                    invocation.operation_name(),
                    invocation.timeout
                );
                terminate(&mut child).await;
                (NO_EXIT_CODE, true)
            }
        };

        drain(stdout_task, LogStream::Stdout).await;
        drain(stderr_task, LogStream::Stderr).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut stderr = take_buffer(&stderr_buf);
        if timed_out {
            stderr.push_str(&format!(
                "stratum: {} killed after exceeding timeout of {:?}\n",
                invocation.operation_name(),
                invocation.timeout
            ));
        }

        if exit_code == 0 && !timed_out {
            debug!(attempt, duration_ms, "{} completed", invocation.operation_name());
        } else {
            debug!(
                attempt,
                exit_code,
                timed_out,
                duration_ms,
                "{} failed",
                invocation.operation_name()
            );
        }

        Ok(CommandResult {
            exit_code,
            stdout: take_buffer(&stdout_buf),
            stderr,
            attempt,
            timed_out,
            started_at,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_configuration_error() {
        let config = RunnerConfig::new("stratum-definitely-not-installed-xyz");
        let result = ProcessRunner::new(config);
        assert!(matches!(result, Err(RunnerError::ToolNotFound(_))));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let config = RunnerConfig::default().program_path("/nonexistent/terraform");
        let result = ProcessRunner::resolve_program(&config);
        assert!(matches!(result, Err(RunnerError::ToolNotFound(p)) if p.contains("nonexistent")));
    }

    #[cfg(unix)]
    #[test]
    fn test_format_command_quotes_spaces() {
        let runner = ProcessRunner::new(RunnerConfig::new("sh").program_path("/bin/sh")).unwrap();
        let formatted = runner.format_command(&[
            "plan".to_string(),
            "-var=name=my app".to_string(),
        ]);
        assert_eq!(formatted, "/bin/sh plan '-var=name=my app'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_working_directory() {
        let runner = ProcessRunner::new(RunnerConfig::new("sh").program_path("/bin/sh")).unwrap();
        let invocation = CommandInvocation::new("/nonexistent/stratum/dir").arg("-c").arg("true");
        let result = runner.run(&invocation, 1).await;
        assert!(matches!(result, Err(RunnerError::WorkingDirectoryMissing(_))));
    }
}
