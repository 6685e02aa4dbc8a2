//! Apply and destroy commands.
//!
//! Both back up state before launching and can restore it on failure.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use stratum_iac::{ApplyOptions, IacError};

use super::{Context, ExecArgs, VarArgs};
use crate::output;

#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    /// Apply a saved plan instead of planning again (apply only)
    #[arg(long, conflicts_with_all = ["vars", "var_file", "targets"])]
    pub plan_file: Option<PathBuf>,

    #[command(flatten)]
    pub vars: VarArgs,

    /// Restore the state backup if the operation fails
    #[arg(long, conflicts_with = "no_rollback")]
    pub rollback: bool,

    /// Keep whatever state the failed operation left
    #[arg(long)]
    pub no_rollback: bool,

    /// Do not back up state first
    #[arg(long)]
    pub no_backup: bool,

    /// Directory for state backups
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Concurrent resource operations
    #[arg(long)]
    pub parallelism: Option<u32>,

    /// Seconds to wait for a state lock
    #[arg(long)]
    pub lock_timeout: Option<u64>,

    /// Do not hold a state lock
    #[arg(long)]
    pub no_lock: bool,

    /// Skip refreshing state before applying
    #[arg(long)]
    pub no_refresh: bool,

    #[command(flatten)]
    pub exec: ExecArgs,
}

impl ApplyArgs {
    pub fn to_options(&self) -> ApplyOptions {
        let mut opts = ApplyOptions::new();
        if let Some(plan) = &self.plan_file {
            opts = opts.plan_file(plan);
        }
        for target in &self.vars.targets {
            opts = opts.target(target);
        }
        if let Some(file) = &self.vars.var_file {
            opts = opts.var_file(file);
        }
        opts.vars = self.vars.var_map();

        if self.rollback {
            opts = opts.rollback(true);
        } else if self.no_rollback {
            opts = opts.rollback(false);
        }
        if self.no_backup {
            opts = opts.backup(false);
        }
        if let Some(dir) = &self.backup_dir {
            opts = opts.backup_dir(dir);
        }
        if let Some(n) = self.parallelism {
            opts = opts.parallelism(n);
        }
        if let Some(secs) = self.lock_timeout {
            opts = opts.lock_timeout(Duration::from_secs(secs));
        }
        if self.no_lock {
            opts = opts.no_lock();
        }
        if self.no_refresh {
            opts = opts.no_refresh();
        }
        opts.exec = self.exec.overrides();
        opts
    }
}

pub async fn execute(ctx: &Context, args: ApplyArgs, destroy: bool) -> Result<()> {
    check_destroy_args(&args, destroy)?;
    let opts = args.to_options();
    let result = if destroy {
        info!("Destroying resources in {}", ctx.dir.display());
        ctx.client.destroy(&ctx.dir, &opts).await?
    } else {
        info!("Applying changes in {}", ctx.dir.display());
        ctx.client.apply(&ctx.dir, &opts).await?
    };

    output::print_operation(&result, ctx.json)?;
    result.into_result()?;
    Ok(())
}

/// Destroy always plans inline, so a saved plan has no meaning there.
fn check_destroy_args(args: &ApplyArgs, destroy: bool) -> Result<(), IacError> {
    if destroy && args.plan_file.is_some() {
        return Err(IacError::Config(
            "--plan-file cannot be used with destroy".to_string(),
        ));
    }
    Ok(())
}
