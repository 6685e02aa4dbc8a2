//! Init command - Initialize a Terraform working directory.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use stratum_iac::InitOptions;

use super::{parse_key_val, Context, ExecArgs};
use crate::output;

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Backend configuration as key=value (repeatable)
    #[arg(long = "backend-config", value_parser = parse_key_val)]
    pub backend_config: Vec<(String, String)>,

    /// Skip backend initialization
    #[arg(long)]
    pub no_backend: bool,

    /// Upgrade modules and providers
    #[arg(long)]
    pub upgrade: bool,

    /// Ignore any saved backend configuration
    #[arg(long, conflicts_with = "migrate_state")]
    pub reconfigure: bool,

    /// Migrate existing state to a changed backend
    #[arg(long)]
    pub migrate_state: bool,

    /// Seconds to wait for a state lock
    #[arg(long)]
    pub lock_timeout: Option<u64>,

    #[command(flatten)]
    pub exec: ExecArgs,
}

impl InitArgs {
    pub fn to_options(&self) -> InitOptions {
        let mut opts = InitOptions::new();
        if self.no_backend {
            opts = opts.without_backend();
        }
        for (key, value) in &self.backend_config {
            opts = opts.backend_config(key, value);
        }
        if self.upgrade {
            opts = opts.upgrade();
        }
        if self.reconfigure {
            opts = opts.reconfigure();
        }
        if self.migrate_state {
            opts = opts.migrate_state();
        }
        if let Some(secs) = self.lock_timeout {
            opts = opts.lock_timeout(Duration::from_secs(secs));
        }
        opts.exec = self.exec.overrides();
        opts
    }
}

pub async fn execute(ctx: &Context, args: InitArgs) -> Result<()> {
    info!("Initializing {}", ctx.dir.display());

    let result = ctx.client.init(&ctx.dir, &args.to_options()).await?;
    output::print_operation(&result, ctx.json)?;

    if result.success && !ctx.json {
        if let Some(record) = ctx.client.workspaces().get(&ctx.dir) {
            println!("  📁 Workspace: {} (backend: {})", record.name, record.backend);
        }
    }

    result.into_result()?;
    Ok(())
}
