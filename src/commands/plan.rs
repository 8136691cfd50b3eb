//! `tierform plan`

use super::Workspace;
use crate::Context;
use crate::{display, ui};
use anyhow::Result;

pub fn run(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    if !ctx.quiet {
        ui::header("Plan");
        ui::kv("Config", &workspace.config_path.display().to_string());
        ui::kv("Region", &workspace.config.region);
    }

    let (graph, provider) = workspace.prepare(ctx)?;
    let state = workspace.store.load()?;
    let plan = declarative::plan(&graph, &state, &provider)?;

    display::display_plan(&plan, ctx.verbose > 0);
    if !plan.is_empty() && !ctx.quiet {
        println!();
        ui::info("Run `tierform apply` to make these changes");
    }
    Ok(())
}
