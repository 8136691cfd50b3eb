//! Typed bootstrap parameters
//!
//! Produced by the provisioning side once the database reports ready, carried
//! to the instance inside the payload, and read back by `boot`.

use crate::error::{Error, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Lowest port the service may bind without root
pub const MIN_SERVICE_PORT: u16 = 1024;

/// POSIX-style account or unit name, safe to embed in commands and units
const NAME_PATTERN: &str = r"^[a-z_][a-z0-9_-]{0,31}$";

fn check_name(field: &str, value: &str) -> Result<()> {
    let pattern = RegexBuilder::new(NAME_PATTERN)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| Error::invalid(field, format!("name pattern: {e}")))?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid(field, format!("{value:?} is not a valid name")))
    }
}

/// Values end up on single lines of the payload, the env file and units
fn check_single_line(field: &str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(Error::invalid(field, "must not contain control characters"));
    }
    Ok(())
}

/// How the web application is fetched and run on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppProfile {
    /// Git repository to clone
    pub repo_url: String,
    /// Checkout location
    pub app_dir: PathBuf,
    pub run_user: String,
    pub run_group: String,
    /// systemd unit name (without `.service`)
    pub service_name: String,
    /// WSGI entry point passed to gunicorn
    pub wsgi_module: String,
    /// `manage.py` arguments that seed sample data
    pub seed_command: Vec<String>,
    pub gunicorn_workers: u32,
}

impl Default for AppProfile {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            app_dir: PathBuf::from("/opt/notes-api"),
            run_user: "ubuntu".to_string(),
            run_group: "www-data".to_string(),
            service_name: "notes-api".to_string(),
            wsgi_module: "notes.wsgi:application".to_string(),
            seed_command: vec![
                "create_sample_data".to_string(),
                "--skip-if-exists".to_string(),
            ],
            gunicorn_workers: 3,
        }
    }
}

impl AppProfile {
    /// Virtualenv inside the checkout
    pub fn venv_dir(&self) -> PathBuf {
        self.app_dir.join("venv")
    }

    pub fn env_file(&self) -> PathBuf {
        self.app_dir.join(".env")
    }

    pub fn python(&self) -> PathBuf {
        self.venv_dir().join("bin/python")
    }

    pub fn manage_py(&self) -> PathBuf {
        self.app_dir.join("manage.py")
    }
}

/// Everything the instance needs to bring the service online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapParameters {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    #[serde(default)]
    pub debug: bool,
    pub secret_key: String,
    pub static_root: PathBuf,
    pub service_port: u16,
    #[serde(default)]
    pub app: AppProfile,
}

impl BootstrapParameters {
    /// Read and validate a parameters file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let params: Self = toml::from_str(&content).map_err(|e| Error::ParamsParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Serialize to the on-host parameters file format
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Check every field the bootstrap sequence relies on
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("db_host", &self.db_host),
            ("db_name", &self.db_name),
            ("db_user", &self.db_user),
            ("db_password", &self.db_password),
            ("secret_key", &self.secret_key),
            ("app.repo_url", &self.app.repo_url),
            ("app.wsgi_module", &self.app.wsgi_module),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::MissingParameter {
                    name: name.to_string(),
                });
            }
        }

        let static_root = self.static_root.to_string_lossy();
        let app_dir = self.app.app_dir.to_string_lossy();
        let mut text_fields = vec![
            ("db_host", self.db_host.as_str()),
            ("db_name", self.db_name.as_str()),
            ("db_user", self.db_user.as_str()),
            ("db_password", self.db_password.as_str()),
            ("secret_key", self.secret_key.as_str()),
            ("static_root", &*static_root),
            ("app.repo_url", self.app.repo_url.as_str()),
            ("app.app_dir", &*app_dir),
            ("app.wsgi_module", self.app.wsgi_module.as_str()),
        ];
        text_fields.extend(
            self.app
                .seed_command
                .iter()
                .map(|arg| ("app.seed_command", arg.as_str())),
        );
        for (name, value) in text_fields {
            check_single_line(name, value)?;
        }

        if self.db_port == 0 {
            return Err(Error::invalid("db_port", "must be non-zero"));
        }
        if self.service_port < MIN_SERVICE_PORT {
            return Err(Error::invalid(
                "service_port",
                format!(
                    "{} is privileged; use a port >= {MIN_SERVICE_PORT}",
                    self.service_port
                ),
            ));
        }

        for (name, path) in [
            ("static_root", &self.static_root),
            ("app.app_dir", &self.app.app_dir),
        ] {
            if !path.is_absolute() {
                return Err(Error::invalid(name, format!("{} is not absolute", path.display())));
            }
        }

        for (name, value) in [
            ("app.run_user", &self.app.run_user),
            ("app.run_group", &self.app.run_group),
            ("app.service_name", &self.app.service_name),
        ] {
            check_name(name, value)?;
        }

        if self.app.gunicorn_workers == 0 {
            return Err(Error::invalid("app.gunicorn_workers", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn sample() -> BootstrapParameters {
        BootstrapParameters {
            db_host: "db.internal".into(),
            db_port: 5432,
            db_name: "notes".into(),
            db_user: "notes_admin".into(),
            db_password: "s3cret pass".into(),
            debug: false,
            secret_key: "k3y".into(),
            static_root: "/var/www/notes/static".into(),
            service_port: 8000,
            app: AppProfile {
                repo_url: "https://git.example.com/notes-api.git".into(),
                ..AppProfile::default()
            },
        }
    }

    #[test]
    fn test_sample_is_valid() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_missing_db_host() {
        let mut params = sample();
        params.db_host = String::new();
        let err = params.validate().unwrap_err();
        assert!(matches!(err, Error::MissingParameter { ref name } if name == "db_host"));
    }

    #[test]
    fn test_privileged_port_rejected() {
        let mut params = sample();
        params.service_port = 80;
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "service_port"
        ));
    }

    #[test]
    fn test_shell_unsafe_user_rejected() {
        let mut params = sample();
        params.app.run_user = "root; rm -rf /".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        let mut params = sample();
        params.db_password = "line\nbreak".into();
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "db_password"
        ));

        let mut params = sample();
        params.app.seed_command.push("--tag\r".into());
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_name_pattern() {
        assert!(check_name("app.run_user", "ubuntu").is_ok());
        assert!(check_name("app.run_user", "_svc-01").is_ok());
        assert!(check_name("app.run_user", "Ubuntu").is_err());
        assert!(check_name("app.run_user", "").is_err());
        assert!(check_name("app.run_user", &"a".repeat(33)).is_err());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bootstrap.toml");
        std::fs::write(&path, sample().to_toml().unwrap()).unwrap();

        assert_eq!(BootstrapParameters::load(&path).unwrap(), sample());
    }

    #[test]
    fn test_profile_defaults_filled_in() {
        let text = r#"
db_host = "db"
db_port = 5432
db_name = "notes"
db_user = "admin"
db_password = "pw"
secret_key = "k"
static_root = "/srv/static"
service_port = 8080

[app]
repo_url = "https://git.example.com/app.git"
"#;
        let params: BootstrapParameters = toml::from_str(text).unwrap();
        assert_eq!(params.app.service_name, "notes-api");
        assert_eq!(params.app.seed_command, vec!["create_sample_data", "--skip-if-exists"]);
        assert!(!params.debug);
        params.validate().unwrap();
    }
}
