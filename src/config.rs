//! Desired-state configuration (`tierform.toml`)
//!
//! ```toml
//! region = "eu-west-1"
//!
//! [compute]
//! image_id = "ami-0abc"
//! key_name = "ops"
//!
//! [database]
//! password = "${NOTES_DB_PASSWORD}"
//!
//! [app]
//! secret_key = "${NOTES_SECRET_KEY}"
//! repo_url = "https://git.example.com/notes-api.git"
//! ```
//!
//! Secret fields may reference environment variables; they are expanded when
//! the file is loaded.

use anyhow::{Context, Result};
use declarative::RetryConfig;
use hostboot::{AppProfile, BootstrapParameters, MIN_SERVICE_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default IP-discovery service
pub const DEFAULT_DISCOVERY_URL: &str = "https://checkip.amazonaws.com";

/// Default environment variable holding the provider API token
pub const DEFAULT_TOKEN_ENV: &str = "TIERFORM_PROVIDER_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub region: String,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub instance_type: String,
    /// Machine image
    pub image_id: String,
    /// SSH key pair registered with the provider
    pub key_name: String,
    /// Where the image carries the tierform binary
    pub agent_path: PathBuf,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3.micro".to_string(),
            image_id: String::new(),
            key_name: String::new(),
            agent_path: PathBuf::from("/usr/local/bin/tierform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub identifier: String,
    pub engine_version: String,
    pub instance_class: String,
    pub storage_type: String,
    /// GiB
    pub allocated_storage: u32,
    /// Initial database
    pub name: String,
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            identifier: "notes-db".to_string(),
            engine_version: "16.3".to_string(),
            instance_class: "db.t3.micro".to_string(),
            storage_type: "gp2".to_string(),
            allocated_storage: 20,
            name: "notes".to_string(),
            username: "notes_admin".to_string(),
            password: String::new(),
            port: 5432,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub secret_key: String,
    pub debug: bool,
    pub static_root: PathBuf,
    pub service_port: u16,
    #[serde(flatten)]
    pub profile: AppProfile,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            debug: false,
            static_root: PathBuf::from("/var/www/notes/static"),
            service_port: 8000,
            profile: AppProfile::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DISCOVERY_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provisioning API
    pub endpoint: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay_ms: 5000,
            backoff_factor: 1.5,
            max_delay_ms: 60_000,
        }
    }
}

impl ReadinessConfig {
    pub fn validate(&self) -> declarative::Result<()> {
        if self.max_attempts == 0 {
            return Err(declarative::Error::validation(
                "readiness.max_attempts must be at least 1",
            ));
        }
        let factor = self.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(declarative::Error::validation(format!(
                "readiness.backoff_factor {factor} must be a finite number >= 1.0"
            )));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// What teardown needs from the config file; other sections are not read
/// and secrets are not expanded
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TeardownConfig {
    pub provider: ProviderConfig,
    pub readiness: ReadinessConfig,
}

impl TeardownConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid deployment config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.readiness.validate()?;
        Ok(config)
    }
}

impl DeploymentConfig {
    /// Read, expand secrets and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid deployment config {}", path.display()))?;
        log::debug!("Loaded deployment config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.database.password = expand_secret("database.password", &config.database.password)?;
        config.app.secret_key = expand_secret("app.secret_key", &config.app.secret_key)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could only fail later at the provider
    pub fn validate(&self) -> declarative::Result<()> {
        let required = [
            ("region", &self.region),
            ("compute.instance_type", &self.compute.instance_type),
            ("compute.image_id", &self.compute.image_id),
            ("compute.key_name", &self.compute.key_name),
            ("database.identifier", &self.database.identifier),
            ("database.password", &self.database.password),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(declarative::Error::validation(format!(
                    "{name} must be set"
                )));
            }
        }

        if self.app.service_port < MIN_SERVICE_PORT {
            return Err(declarative::Error::validation(format!(
                "app.service_port {} is privileged; use a port >= {MIN_SERVICE_PORT}",
                self.app.service_port
            )));
        }
        if self.database.allocated_storage == 0 {
            return Err(declarative::Error::validation(
                "database.allocated_storage must be at least 1",
            ));
        }
        self.readiness.validate()
    }

    /// Parameters the instance receives, given the database endpoint
    pub fn bootstrap_parameters(&self, db_host: &str, db_port: u16) -> BootstrapParameters {
        BootstrapParameters {
            db_host: db_host.to_string(),
            db_port,
            db_name: self.database.name.clone(),
            db_user: self.database.username.clone(),
            db_password: self.database.password.clone(),
            debug: self.app.debug,
            secret_key: self.app.secret_key.clone(),
            static_root: self.app.static_root.clone(),
            service_port: self.app.service_port,
            app: self.app.profile.clone(),
        }
    }
}

/// Expand `$VAR` / `${VAR}` in a secret; an unset variable is an error
fn expand_secret(field: &str, raw: &str) -> Result<String> {
    shellexpand::env(raw)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| anyhow::anyhow!("{field}: environment variable {} is not set", e.var_name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::paths::tests::with_env_var;
    use tempfile::TempDir;

    pub(crate) const SAMPLE: &str = r#"
region = "eu-west-1"

[compute]
image_id = "ami-0abc1234"
key_name = "ops"

[database]
password = "db-pass"

[app]
secret_key = "k3y"
repo_url = "https://git.example.com/notes-api.git"
"#;

    pub(crate) fn sample() -> DeploymentConfig {
        DeploymentConfig::from_toml(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.app.service_port, 8000);
        assert_eq!(config.compute.instance_type, "t3.micro");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.discovery.url, DEFAULT_DISCOVERY_URL);
        assert_eq!(config.app.profile.service_name, "notes-api");
        assert_eq!(
            config.app.profile.seed_command,
            ["create_sample_data", "--skip-if-exists"]
        );
    }

    #[test]
    fn test_app_profile_is_flattened() {
        let config = DeploymentConfig::from_toml(&format!(
            "{SAMPLE}\nservice_name = \"journal\"\ngunicorn_workers = 5\n"
        ))
        .unwrap();
        assert_eq!(config.app.profile.service_name, "journal");
        assert_eq!(config.app.profile.gunicorn_workers, 5);
    }

    #[test]
    fn test_privileged_port_rejected() {
        let err = DeploymentConfig::from_toml(&format!("{SAMPLE}service_port = 80\n")).unwrap_err();
        let err = err.downcast::<declarative::Error>().unwrap();
        assert_eq!(err.category(), declarative::ErrorCategory::ConfigValidation);
    }

    #[test]
    fn test_backoff_factor_rejected() {
        for factor in ["-1.5", "0.5", "nan", "inf"] {
            let text = format!("{SAMPLE}\n[readiness]\nbackoff_factor = {factor}\n");
            let err = DeploymentConfig::from_toml(&text).unwrap_err();
            assert!(
                err.to_string().contains("readiness.backoff_factor"),
                "{factor}: {err}"
            );
        }
        let text = format!("{SAMPLE}\n[readiness]\nbackoff_factor = 1.0\n");
        assert!(DeploymentConfig::from_toml(&text).is_ok());
    }

    #[test]
    fn test_missing_image_rejected() {
        let mut config = sample();
        config.compute.image_id = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compute.image_id"));
    }

    #[test]
    fn test_secret_expansion() {
        let text = SAMPLE.replace("db-pass", "${TIERFORM_TEST_DB_PASSWORD}");
        with_env_var("TIERFORM_TEST_DB_PASSWORD", "from-env", || {
            let config = DeploymentConfig::from_toml(&text).unwrap();
            assert_eq!(config.database.password, "from-env");
        });

        let unset = SAMPLE.replace("db-pass", "${TIERFORM_TEST_UNSET_SECRET}");
        let err = DeploymentConfig::from_toml(&unset).unwrap_err();
        assert!(err.to_string().contains("TIERFORM_TEST_UNSET_SECRET"));
    }

    #[test]
    fn test_teardown_config_skips_secrets() {
        let text = SAMPLE.replace("db-pass", "${TIERFORM_TEST_TEARDOWN_UNSET}")
            + "\n[provider]\nendpoint = \"https://api.example.com\"\n";
        assert!(DeploymentConfig::from_toml(&text).is_err());

        let teardown = TeardownConfig::from_toml(&text).unwrap();
        assert_eq!(teardown.provider.endpoint, "https://api.example.com");
        assert_eq!(teardown.readiness, ReadinessConfig::default());

        let bad = format!("{text}\n[readiness]\nmax_attempts = 0\n");
        assert!(TeardownConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tierform.toml");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(DeploymentConfig::load(&path).unwrap(), sample());

        let missing = DeploymentConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("Could not read"));
    }

    #[test]
    fn test_bootstrap_parameters() {
        let params = sample().bootstrap_parameters("db.internal", 5432);
        params.validate().unwrap();
        assert_eq!(params.db_user, "notes_admin");
        assert_eq!(params.service_port, 8000);
    }

    #[test]
    fn test_retry_config() {
        let retry = ReadinessConfig::default().retry_config();
        assert_eq!(retry.max_attempts, 30);
        assert_eq!(retry.base_delay, Duration::from_secs(5));
        assert_eq!(retry.max_delay, Duration::from_secs(60));
    }
}
