//! Error types for convergence operations.
//!
//! Errors are categorized so callers can tell configuration problems (raised
//! before any provider call) from provider failures and readiness timeouts.

use crate::types::Address;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for convergence operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of convergence errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Desired state is invalid; nothing was submitted to the provider
    ConfigValidation,
    /// Provider rejected or failed a resource
    Provisioning,
    /// A resource did not report ready in time
    DependencyNotReady,
    /// Recorded state could not be read, written or locked
    State,
    /// The run was cancelled
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DependencyNotReady)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ConfigValidation => "Invalid configuration",
            Self::Provisioning => "Provisioning failed",
            Self::DependencyNotReady => "Dependency not ready",
            Self::State => "Recorded state error",
            Self::Cancelled => "Cancelled",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::ConfigValidation => "Fix the configuration and run plan again",
            Self::Provisioning => {
                "Check the resource attributes; resources applied so far remain recorded"
            }
            Self::DependencyNotReady => "The provider is slow; re-run apply to continue",
            Self::State => "Check the state directory and remove a stale lock if no run is active",
            Self::Cancelled => "Re-run apply to continue from the recorded state",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while planning or applying.
#[derive(Debug, Error)]
pub enum Error {
    /// Desired state failed validation
    #[error("invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// Resources depend on each other in a loop
    #[error("dependency cycle: {}", format_path(.path))]
    DependencyCycle { path: Vec<Address> },

    /// Provider rejected a resource
    #[error("provisioning failed for {address}: {message}")]
    Provisioning { address: Address, message: String },

    /// Readiness polling exhausted
    #[error("{address} not ready after {attempts} attempts: {message}")]
    DependencyNotReady {
        address: Address,
        attempts: u32,
        message: String,
    },

    /// Another run holds the state lock
    #[error("state is locked ({holder}); remove {} if no run is active", lock_path.display())]
    StateLocked { holder: String, lock_path: PathBuf },

    /// State file exists but cannot be parsed
    #[error("corrupt state file {}: {message}", path.display())]
    StateCorrupt { path: PathBuf, message: String },

    /// Run cancelled between actions
    #[error("run cancelled after {completed} completed actions")]
    Cancelled { completed: usize },

    /// IO error with path context
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a provisioning error for a resource.
    pub fn provisioning(address: &Address, message: impl Into<String>) -> Self {
        Self::Provisioning {
            address: address.clone(),
            message: message.into(),
        }
    }

    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConfigValidation { .. } | Error::DependencyCycle { .. } => {
                ErrorCategory::ConfigValidation
            }
            Error::Provisioning { .. } => ErrorCategory::Provisioning,
            Error::DependencyNotReady { .. } => ErrorCategory::DependencyNotReady,
            Error::StateLocked { .. } | Error::StateCorrupt { .. } | Error::Io { .. } => {
                ErrorCategory::State
            }
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
            Error::Json(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Address of the resource the error is scoped to, if any.
    pub fn address(&self) -> Option<&Address> {
        match self {
            Error::Provisioning { address, .. } | Error::DependencyNotReady { address, .. } => {
                Some(address)
            }
            _ => None,
        }
    }
}

fn format_path(path: &[Address]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
