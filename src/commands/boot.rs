//! `tierform boot`: runs on the instance, invoked by the first-boot payload

use crate::cli::BootArgs;
use crate::progress::BootProgress;
use crate::{Context, ui};
use anyhow::{Result, bail};
use hostboot::{BootOutcome, BootstrapParameters, ServiceBootstrapMachine, SystemHost};

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

pub fn run(ctx: &Context, args: &BootArgs) -> Result<()> {
    if !is_root() {
        bail!("tierform boot installs packages and system units; run it as root");
    }

    let params = BootstrapParameters::load(&args.params)?;
    if !ctx.quiet {
        ui::header("Bootstrap");
        ui::kv("Parameters", &args.params.display().to_string());
        ui::kv("Repository", &params.app.repo_url);
    }

    let mut progress = BootProgress::new();
    let outcome = ServiceBootstrapMachine::new(&SystemHost, &params)
        .force(args.force)
        .run(&mut progress)?;

    match outcome {
        BootOutcome::AlreadyComplete => {
            ui::info("Bootstrap already completed; pass --force to run it again");
        }
        BootOutcome::Completed(journal) => {
            println!();
            let tolerated: Vec<_> = journal.tolerated().collect();
            if tolerated.is_empty() {
                ui::success(&format!("Reached {}", journal.state));
            } else {
                ui::warn(&format!(
                    "Reached {} with {} step(s) ignored",
                    journal.state,
                    tolerated.len()
                ));
            }
            ui::kv(
                "Service",
                &format!("listening on port {}", params.service_port),
            );
        }
    }
    Ok(())
}
