//! # stratum_iac
//!
//! Terraform operations for Stratum.
//!
//! This crate turns `init`, `plan`, `apply`, `destroy` and state queries into
//! argument vectors, runs them through the retrying engine in
//! `stratum_runner`, and adds the pieces around it:
//!
//! - **State Guard**: backup before apply/destroy, rollback on failure
//! - **Plan Analyzer**: change counts and resource changes from plan output
//! - **Workspace Cache**: last known init status per working directory
//! - **Settings**: `stratum.yaml` plus `STRATUM_*` overrides
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use stratum_iac::{ApplyOptions, PlanOptions, Settings, TerraformClient};
//!
//! # async fn run() -> stratum_iac::IacResult<()> {
//! let dir = Path::new("./infra");
//! let settings = Settings::load(None, dir)?;
//! let client = TerraformClient::from_settings(&settings)?;
//!
//! let plan = client.plan(dir, &PlanOptions::new().out("tfplan")).await?.into_result()?;
//! if plan.analysis.map(|a| a.has_changes()).unwrap_or(false) {
//!     client
//!         .apply(dir, &ApplyOptions::new().plan_file("tfplan").rollback(true))
//!         .await?
//!         .into_result()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod error;
pub mod guard;
pub mod options;
pub mod settings;
pub mod terraform;
pub mod validator;
pub mod workspace;

pub use analyzer::{
    analyze_plan_json, analyze_text, ChangeCounts, ChangeKind, PlanAnalysis, ResourceChange,
};
pub use error::{IacError, IacResult};
pub use guard::{RollbackOutcome, StateBackup, StateGuard, BACKUP_PREFIX, STATE_FILE};
pub use options::{ApplyOptions, DestroyOptions, ExecOverrides, InitOptions, PlanOptions};
pub use settings::{Settings, SETTINGS_FILE};
pub use terraform::{
    ClientOptions, OperationResult, OutputValue, TerraformClient, VersionInfo, WorkspaceList,
};
pub use validator::{StepOutcome, TerraformValidator, ValidationReport, ValidationStep};
pub use workspace::{WorkspaceCache, WorkspaceRecord, WorkspaceStatus};
