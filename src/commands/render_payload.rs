//! `tierform render-payload`

use super::Workspace;
use crate::cli::RenderPayloadArgs;
use crate::{Context, display, ui};
use anyhow::{Context as AnyhowContext, Result};
use hostboot::BootstrapInjector;
use tierform::provisioners::{compute, database};

pub fn run(ctx: &Context, args: &RenderPayloadArgs) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let state = workspace.store.load()?;

    let db = database::database();
    let host = state
        .output(&db, "address")
        .and_then(|v| v.as_str())
        .with_context(|| format!("{db} has no recorded address; run `tierform apply` first"))?;
    let port = state
        .output(&db, "port")
        .and_then(serde_json::Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(workspace.config.database.port);

    let params = workspace.config.bootstrap_parameters(host, port);
    let payload = BootstrapInjector::new()
        .with_agent_path(&workspace.config.compute.agent_path)
        .render(&params)?;

    if !args.diff {
        for line in payload.rendered.split_inclusive('\n') {
            print!("{}", display::redact_line(line));
        }
        return Ok(());
    }

    let recorded = state
        .output(&compute::payload(), "rendered")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    ui::section(&format!("{} ({})", compute::payload(), payload.digest));
    if !display::text_diff(recorded, &payload.rendered) {
        ui::success("Payload matches the one last applied");
    }
    Ok(())
}
