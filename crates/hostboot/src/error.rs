//! Error types for host bootstrap operations.
//!
//! Errors are categorized so the state machine can tell a tolerated step
//! failure (sample data already present) from a fatal one, and so the CLI can
//! give advice.

use crate::machine::BootState;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of bootstrap errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Parameters are missing or invalid; nothing was executed
    InvalidParameters,
    /// A host command failed
    CommandFailed,
    /// Seeding reported a conflict with existing data
    SeedConflict,
    /// File system access failed
    Io,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether re-running the bootstrap may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommandFailed | Self::Io)
    }

    /// Whether this error can be safely ignored (work already done).
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::SeedConflict)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "Invalid bootstrap parameters",
            Self::CommandFailed => "Host command failed",
            Self::SeedConflict => "Sample data already present",
            Self::Io => "File system error",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "Fix the parameters file and run boot again",
            Self::CommandFailed => "Inspect the bootstrap journal, then run boot --force",
            Self::SeedConflict => "No action needed - sample data exists",
            Self::Io => "Check permissions; boot must run as root",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while bootstrapping a host.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter failed validation
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    /// A template placeholder has no value
    #[error("missing bootstrap parameter: {name}")]
    MissingParameter { name: String },

    /// The parameters file could not be parsed
    #[error("failed to parse {path}: {message}")]
    ParamsParse { path: PathBuf, message: String },

    /// A command exited unsuccessfully or could not be spawned
    #[error("command `{command}` failed{}: {stderr}", status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Seeding failed in a way treated as "data already exists"
    #[error("sample data not seeded: {message}")]
    SeedDataConflict { message: String },

    /// A fatal step failure; the sequence stopped here
    #[error("bootstrap step {step} failed: {message}")]
    StepFailed { step: BootState, message: String },

    /// IO error with the path involved
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialize(String),
}

impl Error {
    /// Construct an [`Error::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidParameter { .. }
            | Error::MissingParameter { .. }
            | Error::ParamsParse { .. } => ErrorCategory::InvalidParameters,
            Error::CommandFailed { .. } | Error::StepFailed { .. } => {
                ErrorCategory::CommandFailed
            }
            Error::SeedDataConflict { .. } => ErrorCategory::SeedConflict,
            Error::Io { .. } => ErrorCategory::Io,
            Error::Serialize(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error can be safely ignored.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}
