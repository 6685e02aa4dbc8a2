//! Plan command - Plan changes and summarize them.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use stratum_iac::PlanOptions;

use super::{Context, ExecArgs, VarArgs};
use crate::output;

#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    /// Save the plan to this file
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Plan destruction of all managed resources
    #[arg(long)]
    pub destroy: bool,

    #[command(flatten)]
    pub vars: VarArgs,

    #[command(flatten)]
    pub exec: ExecArgs,
}

impl PlanArgs {
    pub fn to_options(&self) -> PlanOptions {
        let mut opts = PlanOptions::new();
        if let Some(out) = &self.out {
            opts = opts.out(out);
        }
        if self.destroy {
            opts = opts.destroy();
        }
        for target in &self.vars.targets {
            opts = opts.target(target);
        }
        if let Some(file) = &self.vars.var_file {
            opts = opts.var_file(file);
        }
        opts.vars = self.vars.var_map();
        opts.exec = self.exec.overrides();
        opts
    }
}

pub async fn execute(ctx: &Context, args: PlanArgs) -> Result<()> {
    info!("Planning {}", ctx.dir.display());

    let mut result = ctx.client.plan(&ctx.dir, &args.to_options()).await?;

    // A saved plan has exact JSON; prefer it over the text summary.
    if let (true, Some(out)) = (result.success, &args.out) {
        match ctx.client.show_plan(&ctx.dir, out).await {
            Ok(analysis) => result.analysis = Some(analysis),
            Err(e) => warn!("Could not read saved plan {}: {}", out.display(), e),
        }
    }

    output::print_operation(&result, ctx.json)?;
    if let (true, Some(out), false) = (result.success, &args.out, ctx.json) {
        println!("  📄 Plan saved to {}", out.display());
    }

    result.into_result()?;
    Ok(())
}
