//! Invocation and runner configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall-clock bound for one attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default number of attempts beyond the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Verbosity variables forwarded from the caller's environment when set.
pub const TERRAFORM_LOG_VARS: &[&str] = &["TF_LOG", "TF_LOG_PATH", "TF_LOG_CORE", "TF_LOG_PROVIDER"];

/// One request to run the external tool.
///
/// Built per call by an operation wrapper and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInvocation {
    /// Argument vector, tool name excluded
    pub arguments: Vec<String>,
    /// Process working directory
    pub working_directory: PathBuf,
    /// Bound on a single attempt
    pub timeout: Duration,
    /// Attempts allowed beyond the first
    pub max_retries: u32,
    /// Extra environment variables for this call
    pub env: BTreeMap<String, String>,
    /// Logical name when it differs from the subcommand, e.g. `destroy`
    #[serde(default)]
    pub operation: Option<String>,
}

impl CommandInvocation {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            arguments: Vec::new(),
            working_directory: working_directory.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            env: BTreeMap::new(),
            operation: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation = Some(name.into());
        self
    }

    /// Total number of launches this invocation may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The subcommand, e.g. `plan` for `plan -input=false`.
    pub fn subcommand(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or("")
    }

    /// Name used in logs and failure messages: the operation if set,
    /// otherwise the subcommand.
    pub fn operation_name(&self) -> &str {
        self.operation.as_deref().unwrap_or_else(|| self.subcommand())
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

/// Process runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Program name searched on PATH
    pub program: String,
    /// Explicit executable, skips the PATH search
    pub program_path: Option<PathBuf>,
    /// Inherit the caller's whole environment
    pub inherit_env: bool,
    /// Variables copied from the caller's environment when present
    pub passthrough_env: Vec<String>,
    /// Variables always set on the child
    pub env: BTreeMap<String, String>,
    /// Log every output line as it arrives
    pub stream_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("TF_IN_AUTOMATION".to_string(), "1".to_string());
        env.insert("TF_INPUT".to_string(), "0".to_string());

        Self {
            program: "terraform".to_string(),
            program_path: None,
            inherit_env: true,
            passthrough_env: TERRAFORM_LOG_VARS.iter().map(|v| v.to_string()).collect(),
            env,
            stream_output: false,
        }
    }
}

impl RunnerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn program_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.program_path = Some(path.into());
        self
    }

    /// Start the child from an empty environment plus `PATH`, `HOME` and
    /// the pass-through list.
    pub fn isolated_env(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    pub fn passthrough(mut self, var: impl Into<String>) -> Self {
        self.passthrough_env.push(var.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stream_output(mut self, enabled: bool) -> Self {
        self.stream_output = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let invocation = CommandInvocation::new("/work/module")
            .arg("plan")
            .args(["-input=false", "-no-color"])
            .timeout(Duration::from_secs(30))
            .max_retries(2)
            .env("TF_WORKSPACE", "staging");

        assert_eq!(invocation.arguments, vec!["plan", "-input=false", "-no-color"]);
        assert_eq!(invocation.subcommand(), "plan");
        assert_eq!(invocation.timeout, Duration::from_secs(30));
        assert_eq!(invocation.max_attempts(), 3);
        assert_eq!(invocation.env.get("TF_WORKSPACE"), Some(&"staging".to_string()));
    }

    #[test]
    fn test_operation_name_overrides_subcommand() {
        let plain = CommandInvocation::new("/work").args(["state", "list"]);
        assert_eq!(plain.operation_name(), "state");

        let destroy = CommandInvocation::new("/work")
            .args(["apply", "-destroy"])
            .operation("destroy");
        assert_eq!(destroy.subcommand(), "apply");
        assert_eq!(destroy.operation_name(), "destroy");
    }

    #[test]
    fn test_invocation_defaults() {
        let invocation = CommandInvocation::new("/tmp");
        assert_eq!(invocation.timeout, DEFAULT_TIMEOUT);
        assert_eq!(invocation.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(invocation.subcommand(), "");
        assert_eq!(invocation.operation_name(), "");
    }

    #[test]
    fn test_runner_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.program, "terraform");
        assert!(config.passthrough_env.contains(&"TF_LOG".to_string()));
        assert_eq!(config.env.get("TF_IN_AUTOMATION"), Some(&"1".to_string()));
        assert!(!config.stream_output);
        assert!(config.inherit_env);
        assert!(!config.isolated_env().inherit_env);
    }
}
