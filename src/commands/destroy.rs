//! `tierform destroy`

use super::{DialogConfirm, state_store};
use crate::cli::DestroyArgs;
use crate::progress::ApplyProgress;
use crate::{Context, display, ui};
use anyhow::{Result, bail};
use declarative::{AutoConfirm, ExecuteOptions, Executor, LogCallback, ResourceGraph};
use tierform::config::TeardownConfig;
use tierform::{paths, provider};

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let store = state_store(ctx)?;
    if !store.exists() {
        bail!(
            "No recorded state in {}; refusing to destroy",
            store.dir().display()
        );
    }
    // Teardown needs only the provider settings, not the secrets
    let config = TeardownConfig::load(&paths::config_file(ctx.config.as_deref())?)?;
    if !ctx.quiet {
        ui::header("Destroy");
        ui::kv("State", &store.dir().display().to_string());
    }

    let mut lock = store.lock()?;
    let plan = declarative::plan_destroy(lock.state())?;
    display::display_plan(&plan, ctx.verbose > 0);
    if plan.is_empty() {
        return Ok(());
    }

    // Removal is ordered by recorded dependencies alone
    let graph = ResourceGraph::build(Vec::new())?;
    let provider = provider::connect_teardown(&config)?;
    let executor = Executor::new(&graph, &provider)
        .with_options(ExecuteOptions {
            jobs: 4,
            readiness: config.readiness.retry_config(),
        })
        .with_retry_callback(&LogCallback);

    let mut progress = ApplyProgress::new(plan.len(), ctx.quiet);
    let result = if args.yes {
        executor.execute(&plan, &mut lock, &mut progress, &mut AutoConfirm)
    } else {
        executor.execute(&plan, &mut lock, &mut progress, &mut DialogConfirm)
    };
    progress.finish();
    let summary = result?;

    if summary.total_changes() == 0 && summary.skipped == plan.len() {
        ui::warn("Aborted; nothing was destroyed");
        return Ok(());
    }
    display::print_summary(&summary);
    Ok(())
}
