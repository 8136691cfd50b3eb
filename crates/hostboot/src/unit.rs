//! systemd unit for the web service

use crate::params::BootstrapParameters;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory unit files are installed into
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// `Restart=` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    OnFailure,
    Always,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::No => "no",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
        })
    }
}

/// Where stdout/stderr go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSink {
    Journal,
    /// Appended to a file
    File(PathBuf),
}

impl fmt::Display for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Journal => f.write_str("journal"),
            Self::File(path) => write!(f, "append:{}", path.display()),
        }
    }
}

/// A supervised service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub user: String,
    pub group: String,
    pub working_directory: PathBuf,
    pub environment_file: PathBuf,
    pub exec_start: String,
    pub restart: RestartPolicy,
    pub restart_sec: u32,
    pub log_sink: LogSink,
}

impl ServiceUnit {
    /// gunicorn serving the application on the service port
    pub fn for_app(params: &BootstrapParameters) -> Self {
        let app = &params.app;
        let exec_start = format!(
            "{} --workers {} --bind 0.0.0.0:{} {}",
            app.venv_dir().join("bin/gunicorn").display(),
            app.gunicorn_workers,
            params.service_port,
            app.wsgi_module
        );

        Self {
            name: app.service_name.clone(),
            description: format!("{} web service", app.service_name),
            user: app.run_user.clone(),
            group: app.run_group.clone(),
            working_directory: app.app_dir.clone(),
            environment_file: app.env_file(),
            exec_start,
            restart: RestartPolicy::Always,
            restart_sec: 3,
            log_sink: LogSink::Journal,
        }
    }

    /// Install location under `unit_dir`
    pub fn path_in(&self, unit_dir: &Path) -> PathBuf {
        unit_dir.join(format!("{}.service", self.name))
    }

    /// Unit file text
    pub fn render(&self) -> String {
        format!(
            "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={user}
Group={group}
WorkingDirectory={workdir}
EnvironmentFile={env}
ExecStart={exec}
Restart={restart}
RestartSec={restart_sec}
StandardOutput={sink}
StandardError={sink}

[Install]
WantedBy=multi-user.target
",
            description = self.description,
            user = self.user,
            group = self.group,
            workdir = self.working_directory.display(),
            env = self.environment_file.display(),
            exec = self.exec_start,
            restart = self.restart,
            restart_sec = self.restart_sec,
            sink = self.log_sink,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::sample;

    #[test]
    fn test_unit_for_app() {
        let unit = ServiceUnit::for_app(&sample());
        assert_eq!(
            unit.exec_start,
            "/opt/notes-api/venv/bin/gunicorn --workers 3 --bind 0.0.0.0:8000 notes.wsgi:application"
        );
        assert_eq!(
            unit.path_in(Path::new(UNIT_DIR)),
            PathBuf::from("/etc/systemd/system/notes-api.service")
        );
    }

    #[test]
    fn test_render() {
        let text = ServiceUnit::for_app(&sample()).render();
        assert!(text.contains("User=ubuntu\nGroup=www-data\n"));
        assert!(text.contains("EnvironmentFile=/opt/notes-api/.env\n"));
        assert!(text.contains("Restart=always\nRestartSec=3\n"));
        assert!(text.contains("StandardOutput=journal\n"));
        assert!(text.ends_with("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn test_file_log_sink() {
        let sink = LogSink::File("/var/log/notes.log".into());
        assert_eq!(sink.to_string(), "append:/var/log/notes.log");
    }
}
