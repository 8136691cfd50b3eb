mod cli;
mod commands;
mod display;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub caller_ip: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_dir: cli.state_dir,
        caller_ip: cli.caller_ip,
    };

    if let Err(err) = dispatch(&ctx, cli.command) {
        commands::report(&err);
        std::process::exit(1);
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Plan => commands::plan::run(ctx),
        Command::Apply(args) => commands::apply::run(ctx, &args),
        Command::Destroy(args) => commands::destroy::run(ctx, &args),
        Command::Output(args) => commands::output::run(ctx, &args),
        Command::RenderPayload(args) => commands::render_payload::run(ctx, &args),
        Command::Boot(args) => commands::boot::run(ctx, &args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "tierform", &mut io::stdout());
            Ok(())
        }
    }
}
