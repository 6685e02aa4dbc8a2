//! Configuration file and environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stratum_runner::{ClassificationRule, Classifier, RetryPolicy, RunnerConfig};

use crate::error::{IacError, IacResult};
use crate::terraform::ClientOptions;

/// File looked up in the working directory when no path is given.
pub const SETTINGS_FILE: &str = "stratum.yaml";

/// Everything configurable about how the tool is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Explicit executable; searched on PATH when unset
    pub terraform_path: Option<PathBuf>,
    /// Per-attempt bound in seconds
    pub timeout_secs: u64,
    /// Per-subcommand bounds overriding `timeout_secs`, e.g. `apply: 3600`
    pub operation_timeouts: BTreeMap<String, u64>,
    pub max_retries: u32,
    pub retry_step_secs: u64,
    pub retry_cap_secs: u64,
    /// Back up state before apply and destroy
    pub backup: bool,
    /// Restore the backup when apply or destroy fails
    pub rollback: bool,
    pub backup_dir: Option<PathBuf>,
    pub lock_timeout_secs: u64,
    /// Rules checked before the built-in ones
    pub classification_rules: Vec<ClassificationRule>,
    /// Variables set on every child process
    pub env: BTreeMap<String, String>,
    /// Log child output line by line at debug level
    pub stream_output: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            terraform_path: None,
            timeout_secs: 600,
            operation_timeouts: BTreeMap::new(),
            max_retries: 3,
            retry_step_secs: 5,
            retry_cap_secs: 30,
            backup: true,
            rollback: false,
            backup_dir: None,
            lock_timeout_secs: 0,
            classification_rules: Vec::new(),
            env: BTreeMap::new(),
            stream_output: false,
        }
    }
}

impl Settings {
    /// Load settings for `working_dir`.
    ///
    /// An explicit `path` must exist. Otherwise `stratum.yaml` in the working
    /// directory is used when present. Environment overrides apply last.
    pub fn load(path: Option<&Path>, working_dir: &Path) -> IacResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = working_dir.join(SETTINGS_FILE);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> IacResult<Self> {
        debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            IacError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> IacResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `STRATUM_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> IacResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STRATUM_TERRAFORM_PATH") {
            self.terraform_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("STRATUM_MAX_RETRIES") {
            self.max_retries = parse_number("STRATUM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("STRATUM_TIMEOUT_SECS") {
            self.timeout_secs = parse_number("STRATUM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("STRATUM_BACKUP") {
            self.backup = parse_flag("STRATUM_BACKUP", &value)?;
        }
        if let Some(value) = lookup("STRATUM_ROLLBACK") {
            self.rollback = parse_flag("STRATUM_ROLLBACK", &value)?;
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::default().stream_output(self.stream_output);
        if let Some(path) = &self.terraform_path {
            config = config.program_path(path);
        }
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_step_secs),
            Duration::from_secs(self.retry_cap_secs),
        )
    }

    /// Built-in rules with the configured ones checked first.
    pub fn classifier(&self) -> IacResult<Classifier> {
        Ok(Classifier::standard().with_rules(self.classification_rules.clone())?)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            default_timeout: Duration::from_secs(self.timeout_secs),
            operation_timeouts: self
                .operation_timeouts
                .iter()
                .map(|(op, secs)| (op.clone(), Duration::from_secs(*secs)))
                .collect(),
            max_retries: self.max_retries,
            backup: self.backup,
            rollback: self.rollback,
            backup_dir: self.backup_dir.clone(),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> IacResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IacError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> IacResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(IacError::Config(format!(
            "{} must be true or false, got '{}'",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_runner::FailureClass;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert!(settings.backup);
        assert!(!settings.rollback);
        assert_eq!(settings.runner_config().program, "terraform");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
terraform_path: /opt/terraform/bin/terraform
timeout_secs: 120
operation_timeouts:
  apply: 3600
max_retries: 5
rollback: true
classification_rules:
  - id: quota
    pattern: "quota exceeded"
    class: transient
env:
  TF_PLUGIN_CACHE_DIR: /var/cache/terraform
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.max_retries, 5);
        assert!(settings.rollback);
        assert!(settings.backup);

        let options = settings.client_options();
        assert_eq!(options.timeout_for("apply", None), Duration::from_secs(3600));
        assert_eq!(options.timeout_for("plan", None), Duration::from_secs(120));

        let config = settings.runner_config();
        assert_eq!(
            config.program_path,
            Some(PathBuf::from("/opt/terraform/bin/terraform"))
        );
        assert_eq!(
            config.env.get("TF_PLUGIN_CACHE_DIR").map(String::as_str),
            Some("/var/cache/terraform")
        );

        let classifier = settings.classifier().unwrap();
        assert_eq!(
            classifier.classify_text("Error: quota exceeded for project"),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_invalid_rule_pattern_is_config_error() {
        let settings = Settings::from_yaml(
            "classification_rules:\n  - id: bad\n    pattern: \"(\"\n    class: permanent\n",
        )
        .unwrap();
        assert!(matches!(settings.classifier(), Err(IacError::Runner(_))));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Settings::from_yaml("  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        let env: BTreeMap<&str, &str> = [
            ("STRATUM_TERRAFORM_PATH", "/usr/local/bin/terraform"),
            ("STRATUM_MAX_RETRIES", "0"),
            ("STRATUM_TIMEOUT_SECS", "45"),
            ("STRATUM_BACKUP", "false"),
            ("STRATUM_ROLLBACK", "yes"),
        ]
        .into_iter()
        .collect();

        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.terraform_path, Some(PathBuf::from("/usr/local/bin/terraform")));
        assert_eq!(settings.max_retries, 0);
        assert_eq!(settings.timeout_secs, 45);
        assert!(!settings.backup);
        assert!(settings.rollback);
    }

    #[test]
    fn test_bad_env_value() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(|key| {
            (key == "STRATUM_MAX_RETRIES").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(IacError::Config(_))));
    }

    #[test]
    fn test_load_from_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "max_retries: 1\n").unwrap();
        let settings = Settings::from_file(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings.max_retries, 1);

        let missing = Settings::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(IacError::Config(_))));
    }
}
