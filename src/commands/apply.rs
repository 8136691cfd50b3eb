//! `tierform apply`

use super::{DialogConfirm, Workspace};
use crate::cli::ApplyArgs;
use crate::progress::ApplyProgress;
use crate::{Context, display, ui};
use anyhow::Result;
use colored::Colorize;
use declarative::{AutoConfirm, ExecuteOptions, Executor, LogCallback};
use tierform::outputs::DeploymentOutputs;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    if !ctx.quiet {
        ui::header("Apply");
        ui::kv("Config", &workspace.config_path.display().to_string());
        ui::kv("State", &workspace.store.dir().display().to_string());
    }

    let (graph, provider) = workspace.prepare(ctx)?;
    let mut lock = workspace.store.lock()?;
    let plan = declarative::plan(&graph, lock.state(), &provider)?;
    display::display_plan(&plan, ctx.verbose > 0);
    if plan.is_empty() {
        return Ok(());
    }

    let options = ExecuteOptions {
        jobs: args.jobs,
        readiness: workspace.config.readiness.retry_config(),
    };
    let executor = Executor::new(&graph, &provider)
        .with_options(options)
        .with_retry_callback(&LogCallback);

    let mut progress = ApplyProgress::new(plan.len(), ctx.quiet);
    let result = if args.yes {
        executor.execute(&plan, &mut lock, &mut progress, &mut AutoConfirm)
    } else {
        executor.execute(&plan, &mut lock, &mut progress, &mut DialogConfirm)
    };
    progress.finish();
    let summary = result?;

    if summary.skipped == plan.len() && summary.total_changes() == 0 {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }
    display::print_summary(&summary);

    let outputs = DeploymentOutputs::from_state(lock.state());
    if !ctx.quiet {
        ui::section("Outputs");
        for (name, value) in outputs.entries() {
            ui::kv(name, value.unwrap_or("(not available)"));
        }
    }
    Ok(())
}
