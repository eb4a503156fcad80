//! Error taxonomy shared by every probe, section and the CLI.
//!
//! Probe failures are always recovered into `Degraded` results; only
//! configuration problems and a fully uncollectible run surface to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a probe source or the pipeline itself can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RainError {
    /// The fact is not obtainable on this host (unsupported platform,
    /// missing pseudo-file, empty command output).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The current user lacks the privilege the source needs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An optional external tool or interpreter is not installed.
    #[error("missing dependency: {0}")]
    DependencyMissing(String),

    /// A bounded wait on a network call, subprocess or section expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Invalid requested section, config file or environment value.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse label for a [`RainError`], used in reports and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    PermissionDenied,
    DependencyMissing,
    Timeout,
    Configuration,
}

impl RainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RainError::Unavailable(_) => ErrorKind::Unavailable,
            RainError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            RainError::DependencyMissing(_) => ErrorKind::DependencyMissing,
            RainError::Timeout(_) => ErrorKind::Timeout,
            RainError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Process exit code for errors that reach the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            RainError::Configuration(_) => 2,
            _ => 1,
        }
    }

    /// Classify an I/O error from reading a file-backed source.
    pub fn from_read(what: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                RainError::PermissionDenied(format!("{what}: {err}"))
            }
            _ => RainError::Unavailable(format!("{what}: {err}")),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DependencyMissing => "dependency_missing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(label)
    }
}
