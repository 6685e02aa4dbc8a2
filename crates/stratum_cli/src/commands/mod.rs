//! CLI command definitions.
//!
//! This module defines the command structure for the Stratum CLI.
//! Each subcommand maps to one Terraform operation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};

use stratum_iac::{ExecOverrides, Settings, TerraformClient};

pub mod apply;
pub mod init;
pub mod plan;
pub mod state;
pub mod validate;
pub mod version;
pub mod workspace;

/// Stratum - retrying, state-guarded Terraform runner
#[derive(Parser)]
#[command(name = "stratum")]
#[command(version, about = "Stratum - retrying, state-guarded Terraform runner")]
#[command(long_about = r#"
Stratum runs Terraform with timeouts, classified retries and state backups.

OPERATIONS:
  init        → Initialize a working directory
  plan        → Plan and summarize changes
  apply       → Apply with state backup and optional rollback
  destroy     → Destroy with state backup and optional rollback
  validate    → fmt check, backend-less init and validate
  state       → List or show resources in state
  output      → Show root module outputs
  workspace   → List or select workspaces

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  5 - Terraform operation failed
  6 - Terraform operation failed and state rollback failed
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Terraform working directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Settings file (defaults to stratum.yaml in the working directory)
    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a working directory
    Init(init::InitArgs),

    /// Plan changes and summarize them
    Plan(plan::PlanArgs),

    /// Apply changes, backing up state first
    Apply(apply::ApplyArgs),

    /// Destroy all managed resources, backing up state first
    Destroy(apply::ApplyArgs),

    /// Check formatting and validate the configuration
    Validate(validate::ValidateArgs),

    /// Inspect state
    State(StateArgs),

    /// Show root module outputs
    Output,

    /// Manage workspaces
    Workspace(WorkspaceArgs),

    /// Show the Terraform version
    Version,
}

#[derive(Args)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List resource addresses in state
    List,
    /// Show one resource
    Show {
        /// Resource address, e.g. aws_instance.web
        address: String,
    },
}

#[derive(Args)]
pub struct WorkspaceArgs {
    #[command(subcommand)]
    pub command: WorkspaceCommand,
}

#[derive(Subcommand)]
pub enum WorkspaceCommand {
    /// List workspaces
    List,
    /// Select a workspace
    Select {
        name: String,
    },
}

/// Timeout and retry flags shared by operations.
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl ExecArgs {
    pub fn overrides(&self) -> ExecOverrides {
        ExecOverrides {
            timeout: self.timeout.map(Duration::from_secs),
            max_retries: self.max_retries,
        }
    }
}

/// Variable and targeting flags shared by plan, apply and destroy.
#[derive(Args, Debug, Clone, Default)]
pub struct VarArgs {
    /// Input variable as key=value (repeatable)
    #[arg(long = "var", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Variable definitions file
    #[arg(long)]
    pub var_file: Option<PathBuf>,

    /// Limit the operation to a resource address (repeatable)
    #[arg(long = "target")]
    pub targets: Vec<String>,
}

impl VarArgs {
    pub fn var_map(&self) -> BTreeMap<String, String> {
        self.vars.iter().cloned().collect()
    }
}

/// Parse a `key=value` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// Resolved settings and client shared by every command.
pub struct Context {
    pub dir: PathBuf,
    pub json: bool,
    pub client: TerraformClient,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let settings = Settings::load(cli.config.as_deref(), &cli.dir)
            .context("Failed to load settings")?;
        let client = TerraformClient::from_settings(&settings)
            .context("Failed to set up Terraform")?;
        Ok(Self {
            dir: cli.dir.clone(),
            json: cli.json,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("region=eu-west-1").unwrap(),
            ("region".to_string(), "eu-west-1".to_string())
        );
        assert_eq!(
            parse_key_val("tags={a=1}").unwrap(),
            ("tags".to_string(), "{a=1}".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_apply_flags_parse() {
        let cli = Cli::try_parse_from([
            "stratum", "-C", "infra", "--json", "apply", "--var", "env=dev", "--target",
            "aws_instance.web", "--rollback", "--max-retries", "1",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.dir, PathBuf::from("infra"));
        match cli.command {
            Commands::Apply(args) => {
                let opts = args.to_options();
                assert_eq!(opts.vars.get("env").map(String::as_str), Some("dev"));
                assert_eq!(opts.targets, vec!["aws_instance.web"]);
                assert_eq!(opts.rollback, Some(true));
                assert_eq!(opts.exec.max_retries, Some(1));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_state_show_parse() {
        let cli = Cli::try_parse_from(["stratum", "state", "show", "aws_s3_bucket.logs"]).unwrap();
        match cli.command {
            Commands::State(StateArgs {
                command: StateCommand::Show { address },
            }) => assert_eq!(address, "aws_s3_bucket.logs"),
            _ => panic!("expected state show"),
        }
    }

    fn cli_for(dir: &std::path::Path) -> Cli {
        Cli::try_parse_from(["stratum", "-C", dir.to_str().unwrap(), "version"]).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_context_reads_settings_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(stratum_iac::SETTINGS_FILE),
            "terraform_path: /bin/sh\nrollback: true\n",
        )
        .unwrap();

        let ctx = Context::load(&cli_for(dir.path())).unwrap();
        assert_eq!(ctx.dir, dir.path());
        assert!(!ctx.json);
        assert!(ctx.client.options().rollback);
    }

    #[test]
    fn test_bad_settings_is_invalid_args() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(stratum_iac::SETTINGS_FILE),
            "max_retries: [not, a, number]\n",
        )
        .unwrap();

        let err = Context::load(&cli_for(dir.path())).err().unwrap();
        assert_eq!(crate::categorize_error(&err), crate::ExitCodes::INVALID_ARGS);
    }
}
