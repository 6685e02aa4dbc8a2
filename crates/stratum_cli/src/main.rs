//! Stratum CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 5: Terraform operation failed
//! - 6: Terraform operation failed and state rollback failed too

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{Cli, Commands, Context, StateCommand, WorkspaceCommand};
use stratum_iac::IacError;
use stratum_runner::RunnerError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const TERRAFORM_FAILURE: u8 = 5;
    pub const ROLLBACK_FAILURE: u8 = 6;
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "stratum=debug,info"
    } else if quiet {
        "warn"
    } else {
        "stratum=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = run(cli).await;

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(&ctx, args).await,
        Commands::Plan(args) => commands::plan::execute(&ctx, args).await,
        Commands::Apply(args) => commands::apply::execute(&ctx, args, false).await,
        Commands::Destroy(args) => commands::apply::execute(&ctx, args, true).await,
        Commands::Validate(args) => commands::validate::execute(&ctx, args).await,
        Commands::State(args) => match args.command {
            StateCommand::List => commands::state::list(&ctx).await,
            StateCommand::Show { address } => commands::state::show(&ctx, &address).await,
        },
        Commands::Output => commands::state::output(&ctx).await,
        Commands::Workspace(args) => match args.command {
            WorkspaceCommand::List => commands::workspace::list(&ctx).await,
            WorkspaceCommand::Select { name } => commands::workspace::select(&ctx, &name).await,
        },
        Commands::Version => commands::version::execute(&ctx).await,
    }
}

/// Map an error to its exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(iac) = cause.downcast_ref::<IacError>() {
            return match iac {
                IacError::RollbackFailed { .. } => ExitCodes::ROLLBACK_FAILURE,
                IacError::OperationFailed { .. } => ExitCodes::TERRAFORM_FAILURE,
                IacError::Config(_) | IacError::Yaml(_) => ExitCodes::INVALID_ARGS,
                IacError::Runner(runner) => categorize_runner_error(runner),
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if let Some(runner) = cause.downcast_ref::<RunnerError>() {
            return categorize_runner_error(runner);
        }
    }
    ExitCodes::GENERAL_ERROR
}

fn categorize_runner_error(e: &RunnerError) -> u8 {
    match e {
        RunnerError::ToolNotFound(_)
        | RunnerError::WorkingDirectoryMissing(_)
        | RunnerError::InvalidPattern { .. } => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
