use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tierform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision a three-tier deployment and bootstrap its web service", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Desired-state file
    #[arg(short, long, global = true, env = "TIERFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the recorded state
    #[arg(long, global = true, env = "TIERFORM_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Use this IPv4 address for administrative rules instead of discovering it
    #[arg(long, global = true, value_name = "IP")]
    pub caller_ip: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan,

    /// Converge the deployment onto the configuration
    Apply(ApplyArgs),

    /// Tear down every recorded resource
    Destroy(DestroyArgs),

    /// Show deployment outputs
    Output(OutputArgs),

    /// Print the first-boot payload the instance would receive
    RenderPayload(RenderPayloadArgs),

    /// Run the bootstrap sequence on this host
    Boot(BootArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel provider calls within one dependency level
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct OutputArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Print only this output
    pub name: Option<String>,
}

#[derive(Parser)]
pub struct RenderPayloadArgs {
    /// Show a diff against the payload last applied instead of the payload
    #[arg(long)]
    pub diff: bool,
}

#[derive(Parser)]
pub struct BootArgs {
    /// Parameters file written by the payload
    #[arg(long, default_value = "/etc/tierform/bootstrap.toml")]
    pub params: PathBuf,

    /// Run even if the completion marker exists
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from(["tierform", "apply", "--yes", "--jobs", "2", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert!(args.yes);
                assert_eq!(args.jobs, 2);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "tierform",
            "plan",
            "--caller-ip",
            "203.0.113.7",
            "--state-dir",
            "/tmp/tf-state",
        ])
        .unwrap();
        assert_eq!(cli.caller_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/tf-state")));
    }

    #[test]
    fn test_boot_defaults() {
        let cli = Cli::try_parse_from(["tierform", "boot"]).unwrap();
        match cli.command {
            Command::Boot(args) => {
                assert_eq!(args.params, PathBuf::from("/etc/tierform/bootstrap.toml"));
                assert!(!args.force);
            }
            _ => panic!("expected boot"),
        }
    }
}
