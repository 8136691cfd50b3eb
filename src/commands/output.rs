//! `tierform output`

use super::Workspace;
use crate::cli::OutputArgs;
use crate::{Context, ui};
use anyhow::{Result, bail};
use tierform::outputs::DeploymentOutputs;

pub fn run(ctx: &Context, args: &OutputArgs) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let state = workspace.store.load()?;
    let outputs = DeploymentOutputs::from_state(&state);

    if let Some(name) = &args.name {
        let Some((_, value)) = outputs.entries().into_iter().find(|(n, _)| n == name) else {
            bail!("Unknown output '{name}' (expected service_url or db_connect)");
        };
        match value {
            Some(value) => println!("{value}"),
            None => bail!("Output '{name}' is not available; run `tierform apply` first"),
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    if state.is_empty() {
        ui::info("Nothing recorded yet; run `tierform apply` first");
        return Ok(());
    }
    ui::section("Outputs");
    for (name, value) in outputs.entries() {
        ui::kv(name, value.unwrap_or("(not available)"));
    }
    Ok(())
}
