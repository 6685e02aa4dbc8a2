//! Version command.

use anyhow::Result;

use super::Context;
use crate::output;

pub async fn execute(ctx: &Context) -> Result<()> {
    let info = ctx.client.version(&ctx.dir).await?;

    if ctx.json {
        return output::print_json(&info);
    }

    println!("stratum {}", env!("CARGO_PKG_VERSION"));
    match &info.platform {
        Some(platform) => println!("Terraform v{} on {}", info.terraform_version, platform),
        None => println!("Terraform v{}", info.terraform_version),
    }
    for (provider, version) in &info.provider_selections {
        println!("  + provider {} v{}", provider, version);
    }
    if info.terraform_outdated {
        println!("⚠️  A newer Terraform release is available");
    }
    Ok(())
}
