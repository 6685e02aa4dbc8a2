//! Validate command - Check formatting and validate the configuration.

use anyhow::Result;
use clap::Args;
use tracing::info;

use stratum_iac::{IacError, TerraformValidator};
use stratum_runner::FailureClass;

use super::Context;
use crate::output;

#[derive(Args, Debug, Default)]
pub struct ValidateArgs {
    /// Run `terraform validate` only, skipping the fmt check and init
    #[arg(long)]
    pub quick: bool,
}

pub async fn execute(ctx: &Context, args: ValidateArgs) -> Result<()> {
    info!("Validating {}", ctx.dir.display());

    if args.quick {
        let result = ctx.client.validate(&ctx.dir).await?;
        output::print_operation(&result, ctx.json)?;
        result.into_result()?;
        return Ok(());
    }

    let validator = TerraformValidator::new(ctx.client.clone());
    let report = validator.full_validate(&ctx.dir).await?;

    if ctx.json {
        output::print_json(&report)?;
    } else {
        println!("📋 Validating {}...", ctx.dir.display());
        for step in &report.steps {
            let icon = if step.passed { "✅" } else { "❌" };
            let first_line = step.message.lines().next().unwrap_or_default();
            println!("   {} {}: {}", icon, step.step, first_line);
        }
        for file in &report.unformatted_files {
            println!("   📝 needs fmt: {}", file.display());
        }
        for error in &report.errors {
            println!("   ❌ {}", error);
        }
        for warning in &report.warnings {
            println!("   ⚠️  {}", warning);
        }
        println!();
        if report.passed {
            println!("✅ All validations passed!");
        } else {
            println!("❌ Validation failed");
        }
    }

    if !report.passed {
        let failed: Vec<String> = report
            .failed_steps()
            .iter()
            .map(ToString::to_string)
            .collect();
        return Err(IacError::OperationFailed {
            operation: "validate".to_string(),
            class: FailureClass::Permanent,
            attempts: 1,
            message: format!("failed steps: {}", failed.join(", ")),
        }
        .into());
    }

    Ok(())
}
