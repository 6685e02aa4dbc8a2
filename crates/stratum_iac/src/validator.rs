//! Pre-flight validation of a Terraform working directory.
//!
//! Runs the same engine as every other operation, so each step carries its
//! own classification and attempt count.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use stratum_runner::FailureClass;

use crate::analyzer::{analyze_text, MISSING_SUMMARY_WARNING};
use crate::error::IacResult;
use crate::options::InitOptions;
use crate::terraform::{OperationResult, TerraformClient};

/// Steps of a full validation, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStep {
    /// The directory holds `.tf` files
    Detection,
    /// `fmt -check -recursive`
    Format,
    /// `init -backend=false`
    Init,
    /// `validate -no-color`
    Validate,
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detection => "detection",
            Self::Format => "format",
            Self::Init => "init",
            Self::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: ValidationStep,
    pub passed: bool,
    pub message: String,
    /// Classification when the step's command failed
    pub failure: Option<FailureClass>,
    /// Launches made; zero for steps that run no command
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Everything a validation pass found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub working_dir: PathBuf,
    pub steps: Vec<StepOutcome>,
    /// Files `fmt -check` would rewrite
    pub unformatted_files: Vec<PathBuf>,
    /// `Error:` lines from init and validate
    pub errors: Vec<String>,
    /// `Warning:` lines from init and validate
    pub warnings: Vec<String>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            steps: Vec::new(),
            unformatted_files: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            passed: true,
        }
    }

    pub fn step(&self, step: ValidationStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn failed_steps(&self) -> Vec<ValidationStep> {
        self.steps.iter().filter(|s| !s.passed).map(|s| s.step).collect()
    }

    fn push(&mut self, outcome: StepOutcome) {
        if !outcome.passed {
            self.passed = false;
        }
        self.steps.push(outcome);
    }

    fn record(&mut self, step: ValidationStep, result: &OperationResult, ok: &str) {
        let message = if result.success {
            ok.to_string()
        } else {
            result
                .failure_message
                .clone()
                .unwrap_or_else(|| format!("{} failed with exit code {}", step, result.exit_code))
        };
        self.push(StepOutcome {
            step,
            passed: result.success,
            message,
            failure: result.failure,
            attempts: result.attempts,
            duration_ms: result.duration_ms,
        });
    }

    /// Collect tool diagnostics from a command's output.
    fn collect_diagnostics(&mut self, result: &OperationResult) {
        let text = format!("{}\n{}", result.stderr, result.stdout);
        let analysis = analyze_text(&text);
        self.errors.extend(analysis.errors);
        self.warnings.extend(
            analysis
                .warnings
                .into_iter()
                .filter(|w| w != MISSING_SUMMARY_WARNING),
        );
    }
}

/// Runs detection, `fmt -check`, a backend-less `init` and `validate`.
pub struct TerraformValidator {
    client: TerraformClient,
}

impl TerraformValidator {
    pub fn new(client: TerraformClient) -> Self {
        Self { client }
    }

    /// Validate the configuration in `working_dir`.
    ///
    /// A formatting failure is reported but does not stop the pass; a failed
    /// init does, since validate needs providers installed.
    pub async fn full_validate(&self, working_dir: &Path) -> IacResult<ValidationReport> {
        info!("Validating Terraform configuration at {}", working_dir.display());
        let mut report = ValidationReport::new(working_dir);

        let tf_files = terraform_files(working_dir);
        report.push(StepOutcome {
            step: ValidationStep::Detection,
            passed: !tf_files.is_empty(),
            message: format!("{} .tf file(s) found", tf_files.len()),
            failure: None,
            attempts: 0,
            duration_ms: 0,
        });
        if tf_files.is_empty() {
            return Ok(report);
        }

        let fmt = self.client.fmt_check(working_dir).await?;
        if !fmt.success {
            // fmt -check lists offending files on stdout with no stderr.
            report.unformatted_files = fmt
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        report.record(ValidationStep::Format, &fmt, "Formatting is canonical");

        let init = self
            .client
            .init(working_dir, &InitOptions::new().without_backend())
            .await?;
        report.collect_diagnostics(&init);
        report.record(ValidationStep::Init, &init, "Providers and modules installed");
        if !init.success {
            warn!("Skipping validate: init failed in {}", working_dir.display());
            return Ok(report);
        }

        let validate = self.client.validate(working_dir).await?;
        report.collect_diagnostics(&validate);
        report.record(ValidationStep::Validate, &validate, "Configuration is valid");

        Ok(report)
    }
}

fn terraform_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|x| x == "tf").unwrap_or(false))
        .collect()
}
