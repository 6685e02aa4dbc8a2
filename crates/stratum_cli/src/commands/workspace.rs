//! Workspace commands.

use anyhow::Result;

use super::Context;
use crate::output;

pub async fn list(ctx: &Context) -> Result<()> {
    let list = ctx.client.workspace_list(&ctx.dir).await?;

    if ctx.json {
        return output::print_json(&list);
    }
    for name in &list.workspaces {
        let marker = if list.current.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, name);
    }
    Ok(())
}

pub async fn select(ctx: &Context, name: &str) -> Result<()> {
    let result = ctx.client.workspace_select(&ctx.dir, name).await?;
    output::print_operation(&result, ctx.json)?;
    result.into_result()?;
    Ok(())
}
