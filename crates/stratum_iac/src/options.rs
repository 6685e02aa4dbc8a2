//! Per-operation options and their argument vectors.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock wait used when neither the call nor the client sets one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::ZERO;

/// Render a duration the way the tool expects it, e.g. `30s`.
///
/// Whole seconds render as `Ns`, anything else as `Nms`, so a sub-second
/// wait is never truncated to zero.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Timeout and retry overrides shared by every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOverrides {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

fn push_targets(args: &mut Vec<String>, targets: &[String]) {
    args.extend(targets.iter().map(|t| format!("-target={}", t)));
}

fn push_vars(args: &mut Vec<String>, var_file: &Option<PathBuf>, vars: &BTreeMap<String, String>) {
    if let Some(file) = var_file {
        args.push(format!("-var-file={}", file.display()));
    }
    args.extend(vars.iter().map(|(k, v)| format!("-var={}={}", k, v)));
}

/// Options for `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOptions {
    /// Configure the backend; `false` emits `-backend=false`
    pub backend: bool,
    pub backend_config: BTreeMap<String, String>,
    pub upgrade: bool,
    pub reconfigure: bool,
    pub migrate_state: bool,
    /// `None` uses the client default
    pub lock_timeout: Option<Duration>,
    #[serde(default)]
    pub exec: ExecOverrides,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            backend: true,
            backend_config: BTreeMap::new(),
            upgrade: false,
            reconfigure: false,
            migrate_state: false,
            lock_timeout: None,
            exec: ExecOverrides::default(),
        }
    }
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_backend(mut self) -> Self {
        self.backend = false;
        self
    }

    pub fn backend_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_config.insert(key.into(), value.into());
        self
    }

    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn reconfigure(mut self) -> Self {
        self.reconfigure = true;
        self
    }

    pub fn migrate_state(mut self) -> Self {
        self.migrate_state = true;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.exec.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.exec.max_retries = Some(retries);
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["init".to_string()];
        if !self.backend {
            args.push("-backend=false".to_string());
        }
        args.extend(
            self.backend_config
                .iter()
                .map(|(k, v)| format!("-backend-config={}={}", k, v)),
        );
        if self.upgrade {
            args.push("-upgrade".to_string());
        }
        if self.reconfigure {
            args.push("-reconfigure".to_string());
        }
        if self.migrate_state {
            args.push("-migrate-state".to_string());
        }
        if let Some(timeout) = self.lock_timeout {
            args.push(format!("-lock-timeout={}", format_duration(timeout)));
        }
        args
    }
}

/// Options for `plan`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Save the plan to this file
    pub out: Option<PathBuf>,
    /// Plan a destroy
    pub destroy: bool,
    pub targets: Vec<String>,
    pub var_file: Option<PathBuf>,
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub exec: ExecOverrides,
}

impl PlanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn out(mut self, path: impl Into<PathBuf>) -> Self {
        self.out = Some(path.into());
        self
    }

    pub fn destroy(mut self) -> Self {
        self.destroy = true;
        self
    }

    pub fn target(mut self, address: impl Into<String>) -> Self {
        self.targets.push(address.into());
        self
    }

    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_file = Some(path.into());
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.exec.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.exec.max_retries = Some(retries);
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        if let Some(out) = &self.out {
            args.push(format!("-out={}", out.display()));
        }
        if self.destroy {
            args.push("-destroy".to_string());
        }
        push_targets(&mut args, &self.targets);
        push_vars(&mut args, &self.var_file, &self.vars);
        args
    }
}

/// Options for `apply` and `destroy`.
///
/// Destroy runs as `apply -destroy` with the same flags; a saved plan file
/// applies only to `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Apply a saved plan instead of planning inline
    pub plan_file: Option<PathBuf>,
    pub auto_approve: bool,
    pub targets: Vec<String>,
    pub var_file: Option<PathBuf>,
    pub vars: BTreeMap<String, String>,
    /// `false` emits `-lock=false`
    pub lock: bool,
    pub lock_timeout: Option<Duration>,
    pub parallelism: Option<u32>,
    /// `false` emits `-refresh=false`
    pub refresh: bool,
    /// Back up the state first; `None` uses the client default
    pub backup: Option<bool>,
    /// Restore the backup if the operation fails; `None` uses the client default
    pub rollback: Option<bool>,
    /// Directory for the backup, defaults to the working directory
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub exec: ExecOverrides,
}

/// Destroy takes the apply flag set.
pub type DestroyOptions = ApplyOptions;

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            plan_file: None,
            auto_approve: true,
            targets: Vec::new(),
            var_file: None,
            vars: BTreeMap::new(),
            lock: true,
            lock_timeout: None,
            parallelism: None,
            refresh: true,
            backup: None,
            rollback: None,
            backup_dir: None,
            exec: ExecOverrides::default(),
        }
    }
}

impl ApplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.plan_file = Some(path.into());
        self
    }

    pub fn auto_approve(mut self, enabled: bool) -> Self {
        self.auto_approve = enabled;
        self
    }

    pub fn target(mut self, address: impl Into<String>) -> Self {
        self.targets.push(address.into());
        self
    }

    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_file = Some(path.into());
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn no_lock(mut self) -> Self {
        self.lock = false;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn parallelism(mut self, n: u32) -> Self {
        self.parallelism = Some(n);
        self
    }

    pub fn no_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    pub fn backup(mut self, enabled: bool) -> Self {
        self.backup = Some(enabled);
        self
    }

    pub fn rollback(mut self, enabled: bool) -> Self {
        self.rollback = Some(enabled);
        self
    }

    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.exec.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.exec.max_retries = Some(retries);
        self
    }

    /// Arguments for `apply`.
    pub fn to_apply_args(&self) -> Vec<String> {
        match &self.plan_file {
            Some(plan) => vec!["apply".to_string(), plan.display().to_string()],
            None => {
                let mut args = vec!["apply".to_string()];
                self.push_flags(&mut args);
                args
            }
        }
    }

    /// Arguments for `destroy`, which always plans inline.
    pub fn to_destroy_args(&self) -> Vec<String> {
        let mut args = vec!["apply".to_string(), "-destroy".to_string()];
        self.push_flags(&mut args);
        args
    }

    fn push_flags(&self, args: &mut Vec<String>) {
        args.push("-input=false".to_string());
        args.push("-no-color".to_string());
        if self.auto_approve {
            args.push("-auto-approve".to_string());
        }
        push_targets(args, &self.targets);
        push_vars(args, &self.var_file, &self.vars);
        if !self.lock {
            args.push("-lock=false".to_string());
        } else if let Some(timeout) = self.lock_timeout {
            args.push(format!("-lock-timeout={}", format_duration(timeout)));
        }
        if let Some(n) = self.parallelism {
            args.push(format!("-parallelism={}", n));
        }
        if !self.refresh {
            args.push("-refresh=false".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_args() {
        assert_eq!(InitOptions::new().to_args(), vec!["init"]);
        assert_eq!(
            InitOptions::new().lock_timeout(Duration::ZERO).to_args(),
            vec!["init", "-lock-timeout=0s"]
        );

        let args = InitOptions::new()
            .without_backend()
            .backend_config("key", "prod.tfstate")
            .backend_config("bucket", "state")
            .upgrade()
            .reconfigure()
            .migrate_state()
            .lock_timeout(Duration::from_secs(90))
            .to_args();
        assert_eq!(
            args,
            vec![
                "init",
                "-backend=false",
                "-backend-config=bucket=state",
                "-backend-config=key=prod.tfstate",
                "-upgrade",
                "-reconfigure",
                "-migrate-state",
                "-lock-timeout=90s",
            ]
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(
            ApplyOptions::new()
                .lock_timeout(Duration::from_millis(500))
                .to_apply_args()
                .last()
                .map(String::as_str),
            Some("-lock-timeout=500ms")
        );
    }

    #[test]
    fn test_plan_args() {
        let args = PlanOptions::new()
            .out("tfplan")
            .destroy()
            .target("aws_s3_bucket.logs")
            .target("module.vpc")
            .var_file("prod.tfvars")
            .var("region", "eu-west-1")
            .var("env", "prod")
            .to_args();
        assert_eq!(
            args,
            vec![
                "plan",
                "-input=false",
                "-no-color",
                "-out=tfplan",
                "-destroy",
                "-target=aws_s3_bucket.logs",
                "-target=module.vpc",
                "-var-file=prod.tfvars",
                "-var=env=prod",
                "-var=region=eu-west-1",
            ]
        );
    }

    #[test]
    fn test_apply_with_plan_file() {
        let args = ApplyOptions::new().plan_file("tfplan").var("ignored", "x").to_apply_args();
        assert_eq!(args, vec!["apply", "tfplan"]);
    }

    #[test]
    fn test_apply_inline_args() {
        let args = ApplyOptions::new()
            .target("aws_instance.web")
            .var("count", "2")
            .lock_timeout(Duration::from_secs(30))
            .parallelism(4)
            .no_refresh()
            .to_apply_args();
        assert_eq!(
            args,
            vec![
                "apply",
                "-input=false",
                "-no-color",
                "-auto-approve",
                "-target=aws_instance.web",
                "-var=count=2",
                "-lock-timeout=30s",
                "-parallelism=4",
                "-refresh=false",
            ]
        );
    }

    #[test]
    fn test_no_lock_wins_over_lock_timeout() {
        let args = ApplyOptions::new()
            .no_lock()
            .lock_timeout(Duration::from_secs(30))
            .auto_approve(false)
            .to_apply_args();
        assert_eq!(args, vec!["apply", "-input=false", "-no-color", "-lock=false"]);
    }

    #[test]
    fn test_destroy_is_apply_destroy() {
        let args = ApplyOptions::new()
            .plan_file("ignored.tfplan")
            .var("env", "dev")
            .to_destroy_args();
        assert_eq!(
            args,
            vec!["apply", "-destroy", "-input=false", "-no-color", "-auto-approve", "-var=env=dev"]
        );
    }
}
