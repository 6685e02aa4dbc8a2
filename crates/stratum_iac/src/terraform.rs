//! Terraform client.
//!
//! Builds argument vectors for each operation, runs them through the
//! retrying [`ExecutionEngine`], brackets apply and destroy with a
//! [`StateGuard`] and analyzes plan and apply output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use stratum_runner::{
    CommandInvocation, ExecutionEngine, ExecutionOutcome, FailureClass, ProcessRunner,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
};

use crate::analyzer::{analyze_plan_json, analyze_text, PlanAnalysis};
use crate::error::{IacError, IacResult};
use crate::guard::{RollbackOutcome, StateBackup, StateGuard};
use crate::options::{
    ApplyOptions, DestroyOptions, ExecOverrides, InitOptions, PlanOptions, DEFAULT_LOCK_TIMEOUT,
};
use crate::settings::Settings;
use crate::workspace::WorkspaceCache;

/// Client-wide defaults, overridable per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub default_timeout: Duration,
    /// Per-operation timeouts, keyed by e.g. `apply`, `destroy` or `state list`
    pub operation_timeouts: BTreeMap<String, Duration>,
    pub max_retries: u32,
    pub backup: bool,
    pub rollback: bool,
    pub backup_dir: Option<PathBuf>,
    pub lock_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            operation_timeouts: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            backup: true,
            rollback: false,
            backup_dir: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl ClientOptions {
    /// Timeout for `operation`: call override, then per-operation, then default.
    pub fn timeout_for(&self, operation: &str, call: Option<Duration>) -> Duration {
        call.or_else(|| self.operation_timeouts.get(operation).copied())
            .unwrap_or(self.default_timeout)
    }
}

/// Result of one client operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: String,
    pub id: Uuid,
    pub success: bool,
    pub exit_code: i32,
    /// Wall-clock time including retries and back-off
    pub duration_ms: u64,
    pub attempts: u32,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<FailureClass>,
    pub failure_message: Option<String>,
    pub analysis: Option<PlanAnalysis>,
    pub backup: Option<StateBackup>,
    pub rollback: RollbackOutcome,
}

impl OperationResult {
    fn from_outcome(operation: &str, outcome: ExecutionOutcome, started: Instant) -> Self {
        Self {
            operation: operation.to_string(),
            id: Uuid::new_v4(),
            success: outcome.success(),
            exit_code: outcome.result.exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: outcome.attempts,
            failure: outcome.failure,
            failure_message: outcome.failure_message(),
            stdout: outcome.result.stdout,
            stderr: outcome.result.stderr,
            analysis: None,
            backup: None,
            rollback: RollbackOutcome::NotNeeded,
        }
    }

    /// Turn a failed operation into an error.
    ///
    /// A failed rollback wins, and its error carries the original failure.
    pub fn into_result(self) -> IacResult<Self> {
        if let RollbackOutcome::Failed { error } = &self.rollback {
            return Err(IacError::RollbackFailed {
                operation: self.operation.clone(),
                original: self.failure_message.clone().unwrap_or_default(),
                rollback: error.clone(),
            });
        }
        if !self.success {
            return Err(IacError::OperationFailed {
                operation: self.operation.clone(),
                class: self.failure.unwrap_or(FailureClass::Permanent),
                attempts: self.attempts,
                message: self.failure_message.clone().unwrap_or_default(),
            });
        }
        Ok(self)
    }
}

/// One value from `output -json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: serde_json::Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "type", default)]
    pub value_type: serde_json::Value,
}

/// Parsed `version -json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub terraform_version: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub provider_selections: BTreeMap<String, String>,
    #[serde(default)]
    pub terraform_outdated: bool,
}

/// Workspaces known to a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceList {
    pub workspaces: Vec<String>,
    pub current: Option<String>,
}

impl WorkspaceList {
    /// Parse `workspace list` output, where `*` marks the current workspace.
    pub fn parse(output: &str) -> Self {
        let mut list = Self {
            workspaces: Vec::new(),
            current: None,
        };
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix('*') {
                Some(name) => {
                    let name = name.trim().to_string();
                    list.current = Some(name.clone());
                    list.workspaces.push(name);
                }
                None => list.workspaces.push(line.to_string()),
            }
        }
        list
    }
}

/// Drives the tool for init, plan, apply, destroy and state queries.
#[derive(Clone)]
pub struct TerraformClient {
    engine: ExecutionEngine,
    options: ClientOptions,
    workspaces: WorkspaceCache,
}

impl TerraformClient {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine,
            options: ClientOptions::default(),
            workspaces: WorkspaceCache::new(),
        }
    }

    /// Build a client that launches the real executable.
    pub fn from_settings(settings: &Settings) -> IacResult<Self> {
        let runner = ProcessRunner::new(settings.runner_config())?;
        let engine = ExecutionEngine::new(Arc::new(runner))
            .with_policy(settings.retry_policy())
            .with_classifier(settings.classifier()?);
        Ok(Self::new(engine).with_options(settings.client_options()))
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn workspaces(&self) -> &WorkspaceCache {
        &self.workspaces
    }

    fn invocation(
        &self,
        operation: &str,
        dir: &Path,
        args: Vec<String>,
        exec: &ExecOverrides,
    ) -> CommandInvocation {
        CommandInvocation::new(dir)
            .args(args)
            .operation(operation)
            .timeout(self.options.timeout_for(operation, exec.timeout))
            .max_retries(exec.max_retries.unwrap_or(self.options.max_retries))
    }

    async fn run(
        &self,
        operation: &str,
        dir: &Path,
        args: Vec<String>,
        exec: &ExecOverrides,
    ) -> IacResult<OperationResult> {
        let invocation = self.invocation(operation, dir, args, exec);
        info!("Running terraform {} in {}", operation, dir.display());

        let started = Instant::now();
        let outcome = self.engine.execute(&invocation).await?;
        let result = OperationResult::from_outcome(operation, outcome, started);

        if result.success {
            info!(
                attempts = result.attempts,
                duration_ms = result.duration_ms,
                "terraform {} succeeded",
                operation
            );
        } else {
            error!(
                attempts = result.attempts,
                "terraform {} failed ({})",
                operation,
                result.failure.map(|c| c.as_str()).unwrap_or("unknown")
            );
        }
        Ok(result)
    }

    /// `init`. Records the outcome in the workspace cache.
    pub async fn init(&self, dir: &Path, opts: &InitOptions) -> IacResult<OperationResult> {
        let mut opts = opts.clone();
        opts.lock_timeout.get_or_insert(self.options.lock_timeout);
        let result = self.run("init", dir, opts.to_args(), &opts.exec).await?;
        self.workspaces.record_init(dir, result.success);
        Ok(result)
    }

    /// `plan`, with the output analyzed.
    pub async fn plan(&self, dir: &Path, opts: &PlanOptions) -> IacResult<OperationResult> {
        let mut result = self.run("plan", dir, opts.to_args(), &opts.exec).await?;
        result.analysis = Some(analyze_text(&result.stdout));
        Ok(result)
    }

    /// `apply`, guarded by a state backup.
    pub async fn apply(&self, dir: &Path, opts: &ApplyOptions) -> IacResult<OperationResult> {
        let opts = self.with_lock_default(opts);
        self.guarded("apply", dir, opts.to_apply_args(), &opts).await
    }

    /// `destroy`, run as `apply -destroy` and guarded by a state backup.
    pub async fn destroy(&self, dir: &Path, opts: &DestroyOptions) -> IacResult<OperationResult> {
        let opts = self.with_lock_default(opts);
        self.guarded("destroy", dir, opts.to_destroy_args(), &opts).await
    }

    /// Fill an unset lock wait from the client default.
    fn with_lock_default(&self, opts: &ApplyOptions) -> ApplyOptions {
        let mut opts = opts.clone();
        opts.lock_timeout.get_or_insert(self.options.lock_timeout);
        opts
    }

    async fn guarded(
        &self,
        operation: &str,
        dir: &Path,
        args: Vec<String>,
        opts: &ApplyOptions,
    ) -> IacResult<OperationResult> {
        let mut guard = StateGuard::new(dir).enabled(opts.backup.unwrap_or(self.options.backup));
        if let Some(backup_dir) = opts.backup_dir.as_ref().or(self.options.backup_dir.as_ref()) {
            guard = guard.backup_dir(backup_dir);
        }
        let rollback = opts.rollback.unwrap_or(self.options.rollback);

        let backup = guard.backup()?;
        let mut result = self.run(operation, dir, args, &opts.exec).await?;

        result.rollback = guard.finish(backup.as_ref(), result.success, rollback);
        if result.rollback.is_failed() {
            warn!("terraform {} failed and state could not be restored", operation);
        }
        result.backup = backup;
        result.analysis = Some(analyze_text(&result.stdout));
        Ok(result)
    }

    /// `validate -no-color`.
    pub async fn validate(&self, dir: &Path) -> IacResult<OperationResult> {
        let args = vec!["validate".to_string(), "-no-color".to_string()];
        self.run("validate", dir, args, &ExecOverrides::default()).await
    }

    /// `fmt -check -recursive`.
    pub async fn fmt_check(&self, dir: &Path) -> IacResult<OperationResult> {
        let args = vec!["fmt".to_string(), "-check".to_string(), "-recursive".to_string()];
        self.run("fmt", dir, args, &ExecOverrides::default()).await
    }

    /// Addresses tracked in state.
    pub async fn state_list(&self, dir: &Path) -> IacResult<Vec<String>> {
        let args = vec!["state".to_string(), "list".to_string()];
        let result = self
            .run("state list", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Attributes of one resource, as printed by the tool.
    pub async fn state_show(&self, dir: &Path, address: &str) -> IacResult<String> {
        let args = vec![
            "state".to_string(),
            "show".to_string(),
            "-no-color".to_string(),
            address.to_string(),
        ];
        let result = self
            .run("state show", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        Ok(result.stdout)
    }

    /// Root module outputs.
    pub async fn output(&self, dir: &Path) -> IacResult<BTreeMap<String, OutputValue>> {
        let args = vec!["output".to_string(), "-json".to_string()];
        let result = self
            .run("output", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        if result.stdout.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&result.stdout)?)
    }

    /// Analyze a saved plan via `show -json`.
    pub async fn show_plan(&self, dir: &Path, plan_file: &Path) -> IacResult<PlanAnalysis> {
        let args = vec![
            "show".to_string(),
            "-json".to_string(),
            plan_file.display().to_string(),
        ];
        let result = self
            .run("show", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        analyze_plan_json(&result.stdout)
    }

    pub async fn version(&self, dir: &Path) -> IacResult<VersionInfo> {
        let args = vec!["version".to_string(), "-json".to_string()];
        let result = self
            .run("version", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        serde_json::from_str(&result.stdout)
            .map_err(|e| IacError::InvalidOutput(format!("version JSON: {}", e)))
    }

    pub async fn workspace_list(&self, dir: &Path) -> IacResult<WorkspaceList> {
        let args = vec!["workspace".to_string(), "list".to_string()];
        let result = self
            .run("workspace list", dir, args, &ExecOverrides::default())
            .await?
            .into_result()?;
        Ok(WorkspaceList::parse(&result.stdout))
    }

    pub async fn workspace_select(&self, dir: &Path, name: &str) -> IacResult<OperationResult> {
        let args = vec!["workspace".to_string(), "select".to_string(), name.to_string()];
        self.run("workspace select", dir, args, &ExecOverrides::default())
            .await
    }
}
