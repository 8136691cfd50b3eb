//! First-boot state machine
//!
//! The sequence is a static table of steps, each advancing the machine to one
//! [`BootState`]. Steps run strictly in order and are never retried. A fatal
//! failure stops the sequence with the journal recording the last reached
//! state; a tolerated failure (seeding conflicts) is logged and skipped.

use crate::env_file::render_env_file;
use crate::error::{Error, Result};
use crate::host::{CommandOutput, Host, HostCommand};
use crate::params::BootstrapParameters;
use crate::unit::{ServiceUnit, UNIT_DIR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_JOURNAL: &str = "/var/lib/tierform/bootstrap.json";
pub const DEFAULT_MARKER: &str = "/var/lib/tierform/bootstrap.done";

const SYSTEM_PACKAGES: [&str; 4] = ["python3", "python3-venv", "python3-pip", "git"];

/// States of the bootstrap sequence, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootState {
    Provisioning,
    DependenciesInstalled,
    SourceFetched,
    ConfigWritten,
    MigrationApplied,
    StaticAssetsCollected,
    DataSeeded,
    ServiceRegistered,
    ServiceRunning,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::DependenciesInstalled => "dependencies_installed",
            Self::SourceFetched => "source_fetched",
            Self::ConfigWritten => "config_written",
            Self::MigrationApplied => "migration_applied",
            Self::StaticAssetsCollected => "static_assets_collected",
            Self::DataSeeded => "data_seeded",
            Self::ServiceRegistered => "service_registered",
            Self::ServiceRunning => "service_running",
        };
        f.write_str(name)
    }
}

/// What a step failure does to the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort; the service is never started
    Fatal,
    /// Log and continue when the error is ignorable
    Tolerated,
}

type StepAction = fn(&dyn Host, &BootstrapParameters, &BootPaths) -> Result<Option<String>>;

/// One row of the step table
pub struct Step {
    pub target: BootState,
    pub description: &'static str,
    pub policy: FailurePolicy,
    action: StepAction,
}

/// The bootstrap sequence
pub static STEPS: [Step; 8] = [
    Step {
        target: BootState::DependenciesInstalled,
        description: "Install system packages",
        policy: FailurePolicy::Fatal,
        action: install_dependencies,
    },
    Step {
        target: BootState::SourceFetched,
        description: "Fetch application source",
        policy: FailurePolicy::Fatal,
        action: fetch_source,
    },
    Step {
        target: BootState::ConfigWritten,
        description: "Write environment file",
        policy: FailurePolicy::Fatal,
        action: write_config,
    },
    Step {
        target: BootState::MigrationApplied,
        description: "Apply database migrations",
        policy: FailurePolicy::Fatal,
        action: apply_migrations,
    },
    Step {
        target: BootState::StaticAssetsCollected,
        description: "Collect static assets",
        policy: FailurePolicy::Fatal,
        action: collect_static,
    },
    Step {
        target: BootState::DataSeeded,
        description: "Seed sample data",
        policy: FailurePolicy::Tolerated,
        action: seed_data,
    },
    Step {
        target: BootState::ServiceRegistered,
        description: "Register service unit",
        policy: FailurePolicy::Fatal,
        action: register_service,
    },
    Step {
        target: BootState::ServiceRunning,
        description: "Start service",
        policy: FailurePolicy::Fatal,
        action: start_service,
    },
];

/// On-host locations the machine writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPaths {
    pub journal: PathBuf,
    /// Present once the sequence has completed
    pub marker: PathBuf,
    pub unit_dir: PathBuf,
}

impl Default for BootPaths {
    fn default() -> Self {
        Self {
            journal: PathBuf::from(DEFAULT_JOURNAL),
            marker: PathBuf::from(DEFAULT_MARKER),
            unit_dir: PathBuf::from(UNIT_DIR),
        }
    }
}

/// Outcome of one step as journaled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Tolerated {
        message: String,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub state: BootState,
    #[serde(flatten)]
    pub status: StepStatus,
    pub at: DateTime<Utc>,
}

/// Persisted progress of the sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootJournal {
    /// Last state reached
    pub state: BootState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// Fatal error that stopped the sequence
    #[serde(default)]
    pub error: Option<String>,
}

impl BootJournal {
    fn new() -> Self {
        Self {
            state: BootState::Provisioning,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            error: None,
        }
    }

    /// Whether a state was reached
    pub fn reached(&self, state: BootState) -> bool {
        self.state >= state
    }

    /// Steps whose failure was tolerated
    pub fn tolerated(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Tolerated { .. }))
    }
}

/// Result of [`ServiceBootstrapMachine::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// The completion marker was present; nothing ran
    AlreadyComplete,
    Completed(BootJournal),
}

/// Observer for step progress
pub trait StepObserver {
    fn on_step_start(&mut self, index: usize, total: usize, step: &Step);
    fn on_step_complete(&mut self, step: &Step, status: &StepStatus);
}

/// Observer that only logs
pub struct LogObserver;

impl StepObserver for LogObserver {
    fn on_step_start(&mut self, index: usize, total: usize, step: &Step) {
        log::info!("[{}/{}] {}", index + 1, total, step.description);
    }

    fn on_step_complete(&mut self, step: &Step, status: &StepStatus) {
        log::debug!("{} -> {:?}", step.target, status);
    }
}

/// Executes the step table against a host
pub struct ServiceBootstrapMachine<'a> {
    host: &'a dyn Host,
    params: &'a BootstrapParameters,
    paths: BootPaths,
    force: bool,
}

impl<'a> ServiceBootstrapMachine<'a> {
    pub fn new(host: &'a dyn Host, params: &'a BootstrapParameters) -> Self {
        Self {
            host,
            params,
            paths: BootPaths::default(),
            force: false,
        }
    }

    pub fn with_paths(mut self, paths: BootPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Run even if the completion marker exists
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the sequence to `ServiceRunning` or the first fatal failure
    pub fn run(&self, observer: &mut dyn StepObserver) -> Result<BootOutcome> {
        if !self.force && self.host.exists(&self.paths.marker) {
            log::info!(
                "Bootstrap already completed ({} exists)",
                self.paths.marker.display()
            );
            return Ok(BootOutcome::AlreadyComplete);
        }

        self.params.validate()?;

        let mut journal = BootJournal::new();
        self.save(&journal)?;

        for (index, step) in STEPS.iter().enumerate() {
            observer.on_step_start(index, STEPS.len(), step);

            let status = match (step.action)(self.host, self.params, &self.paths) {
                Ok(note) => StepStatus::Completed { note },
                Err(e) if step.policy == FailurePolicy::Tolerated && e.is_ignorable() => {
                    log::warn!("{} skipped: {}", step.description, e);
                    StepStatus::Tolerated {
                        message: e.to_string(),
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let status = StepStatus::Failed {
                        message: message.clone(),
                    };
                    observer.on_step_complete(step, &status);
                    journal.steps.push(StepRecord {
                        state: step.target,
                        status,
                        at: Utc::now(),
                    });
                    journal.error = Some(message.clone());
                    journal.finished_at = Some(Utc::now());
                    self.save(&journal)?;
                    return Err(Error::StepFailed {
                        step: step.target,
                        message,
                    });
                }
            };

            observer.on_step_complete(step, &status);
            journal.state = step.target;
            journal.steps.push(StepRecord {
                state: step.target,
                status,
                at: Utc::now(),
            });
            self.save(&journal)?;
        }

        journal.finished_at = Some(Utc::now());
        self.save(&journal)?;
        self.host.write_file(
            &self.paths.marker,
            &format!("{}\n", Utc::now().to_rfc3339()),
            0o644,
        )?;

        Ok(BootOutcome::Completed(journal))
    }

    fn save(&self, journal: &BootJournal) -> Result<()> {
        let content = serde_json::to_string_pretty(journal)?;
        self.host.write_file(&self.paths.journal, &content, 0o600)
    }
}

/// Run a command and turn a non-zero exit into an error
fn run_checked(host: &dyn Host, command: &HostCommand) -> Result<CommandOutput> {
    let output = host.run(command)?;
    if output.is_success() {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: command.to_string(),
            status: output.status,
            stderr: last_line(&output.stderr),
        })
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn manage(params: &BootstrapParameters) -> HostCommand {
    let app = &params.app;
    HostCommand::new(app.python().display().to_string())
        .arg(app.manage_py())
        .cwd(&app.app_dir)
        .as_user(&app.run_user)
}

fn install_dependencies(
    host: &dyn Host,
    _params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    run_checked(
        host,
        &HostCommand::new("apt-get")
            .arg("update")
            .env("DEBIAN_FRONTEND", "noninteractive"),
    )?;
    run_checked(
        host,
        &HostCommand::new("apt-get")
            .args(["install", "-y"])
            .args(SYSTEM_PACKAGES)
            .env("DEBIAN_FRONTEND", "noninteractive"),
    )?;
    Ok(None)
}

fn fetch_source(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    let app = &params.app;
    let owner = format!("{}:{}", app.run_user, app.run_group);

    let note = if host.exists(&app.app_dir.join(".git")) {
        run_checked(
            host,
            &HostCommand::new("git")
                .arg("-C")
                .arg(&app.app_dir)
                .args(["pull", "--ff-only"])
                .as_user(&app.run_user),
        )?;
        "fast-forwarded existing checkout"
    } else {
        run_checked(
            host,
            &HostCommand::new("git")
                .args(["clone", "--depth", "1", &app.repo_url])
                .arg(&app.app_dir),
        )?;
        run_checked(
            host,
            &HostCommand::new("chown")
                .args(["-R", &owner])
                .arg(&app.app_dir),
        )?;
        "cloned"
    };

    run_checked(
        host,
        &HostCommand::new("python3")
            .args(["-m", "venv"])
            .arg(app.venv_dir())
            .as_user(&app.run_user),
    )?;
    run_checked(
        host,
        &HostCommand::new(app.venv_dir().join("bin/pip").display().to_string())
            .args(["install", "-r"])
            .arg(app.app_dir.join("requirements.txt"))
            .arg("gunicorn")
            .cwd(&app.app_dir)
            .as_user(&app.run_user),
    )?;
    Ok(Some(note.to_string()))
}

fn write_config(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    let app = &params.app;
    let path = app.env_file();
    host.write_file(&path, &render_env_file(params), 0o600)?;
    host.chown(&path, &app.run_user, &app.run_group)?;
    Ok(None)
}

fn apply_migrations(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    run_checked(host, &manage(params).args(["migrate", "--noinput"]))?;
    Ok(None)
}

fn collect_static(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    let app = &params.app;
    host.create_dir(&params.static_root)?;
    host.chown(&params.static_root, &app.run_user, &app.run_group)?;
    run_checked(host, &manage(params).args(["collectstatic", "--noinput"]))?;
    Ok(None)
}

fn seed_data(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    let command = manage(params).args(&params.app.seed_command);
    // Seeding never stops the sequence, even when the command cannot start
    let output = host.run(&command).map_err(|e| Error::SeedDataConflict {
        message: e.to_string(),
    })?;
    if output.is_success() {
        Ok(Some(last_line(&output.stdout)).filter(|s| !s.is_empty()))
    } else {
        // Any non-zero exit of the seed command is read as existing data
        Err(Error::SeedDataConflict {
            message: last_line(&output.stderr),
        })
    }
}

fn register_service(
    host: &dyn Host,
    params: &BootstrapParameters,
    paths: &BootPaths,
) -> Result<Option<String>> {
    let unit = ServiceUnit::for_app(params);
    let path = unit.path_in(&paths.unit_dir);
    let rendered = unit.render();

    let note = if host.read_file(&path)?.as_deref() == Some(rendered.as_str()) {
        "unit unchanged"
    } else {
        host.write_file(&path, &rendered, 0o644)?;
        "unit written"
    };

    run_checked(host, &HostCommand::new("systemctl").arg("daemon-reload"))?;
    run_checked(
        host,
        &HostCommand::new("systemctl").args(["enable", &unit.name]),
    )?;
    Ok(Some(note.to_string()))
}

fn start_service(
    host: &dyn Host,
    params: &BootstrapParameters,
    _paths: &BootPaths,
) -> Result<Option<String>> {
    let name = &params.app.service_name;
    run_checked(host, &HostCommand::new("systemctl").args(["restart", name]))?;
    run_checked(
        host,
        &HostCommand::new("systemctl").args(["is-active", "--quiet", name]),
    )?;
    Ok(None)
}
