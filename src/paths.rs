//! Centralized path resolution for tierform
//!
//! # Environment Variables
//!
//! - `TIERFORM_CONFIG` - Desired-state file (overridden by `--config`)
//! - `TIERFORM_CONFIG_DIR` - Override config directory
//! - `TIERFORM_STATE_DIR` - Override state directory (recorded state, lock)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `TIERFORM_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/tierform` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\tierform`
//!    - macOS/Linux: `~/.config/tierform`
//!
//! For state_dir():
//! 1. `TIERFORM_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/tierform` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\tierform`
//!    - macOS/Linux: `~/.local/state/tierform`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the desired-state file
pub const ENV_CONFIG: &str = "TIERFORM_CONFIG";

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "TIERFORM_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "TIERFORM_STATE_DIR";

/// Default desired-state file name inside the config directory
pub const CONFIG_FILE: &str = "tierform.toml";

const APP: &str = "tierform";

/// Get the tierform config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join(APP);
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the tierform state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join(APP);
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Resolve the desired-state file
///
/// Priority: explicit flag, then `TIERFORM_CONFIG`, then
/// `<config dir>/tierform.toml`.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(&path.to_string_lossy()));
    }
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(expand(&path));
    }
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```
/// use tierform::paths;
///
/// let home_path = paths::expand("~/deployments/notes");
/// let var_path = paths::expand("$HOME/deployments");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
