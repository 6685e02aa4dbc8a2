//! State and output commands.

use anyhow::Result;

use super::Context;
use crate::output;

pub async fn list(ctx: &Context) -> Result<()> {
    let addresses = ctx.client.state_list(&ctx.dir).await?;

    if ctx.json {
        return output::print_json(&addresses);
    }
    if addresses.is_empty() {
        println!("No resources in state.");
    }
    for address in &addresses {
        println!("{}", address);
    }
    Ok(())
}

pub async fn show(ctx: &Context, address: &str) -> Result<()> {
    let text = ctx.client.state_show(&ctx.dir, address).await?;

    if ctx.json {
        return output::print_json(&serde_json::json!({
            "address": address,
            "attributes": text,
        }));
    }
    println!("{}", text.trim_end());
    Ok(())
}

pub async fn output(ctx: &Context) -> Result<()> {
    let outputs = ctx.client.output(&ctx.dir).await?;

    if ctx.json {
        return output::print_json(&outputs);
    }
    if outputs.is_empty() {
        println!("No outputs.");
    }
    for (name, value) in &outputs {
        if value.sensitive {
            println!("{} = <sensitive>", name);
        } else {
            println!("{} = {}", name, value.value);
        }
    }
    Ok(())
}
