//! Error handling for servus.
use thiserror::Error;

use crate::config::BackendKind;

/// Defines all possible errors that can occur in the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Error reading the project manifest.
    #[error("Failed to read manifest: {0}")]
    ManifestRead(std::io::Error),

    /// Error parsing the YAML manifest.
    #[error("Invalid manifest: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    /// Malformed or out-of-range configuration, rejected before any process is touched.
    #[error("Invalid configuration: {message}")]
    Validation {
        /// Description of the offending field or value.
        message: String,
    },

    /// A named environment was selected but no such section exists in the manifest.
    #[error("Environment '{name}' not found in manifest. Available environments: {available:?}")]
    UnknownEnvironment {
        /// The requested environment name.
        name: String,
        /// Environment names that are actually defined.
        available: Vec<String>,
    },

    /// An operation was requested that the host platform cannot provide.
    #[error("'{operation}' is not supported on this platform")]
    PlatformUnsupported {
        /// The unsupported operation (e.g. daemonization, pre-fork backend).
        operation: String,
    },

    /// The target bind address is already in use.
    #[error("Port {port} is already in use{}", .occupant.as_deref().map(|o| format!(" by {o}")).unwrap_or_default())]
    PortConflict {
        /// The conflicting port.
        port: u16,
        /// Identity of the occupying process, when obtainable.
        occupant: Option<String>,
    },

    /// The supervised child exited before confirming readiness.
    #[error("Failed to launch {backend} backend: {detail}")]
    LaunchFailure {
        /// The backend strategy that was being launched.
        backend: BackendKind,
        /// Whatever diagnostic the child emitted before exiting.
        detail: String,
    },

    /// Error delivering a control signal.
    #[error("Failed to signal process: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// Error for the PID record file.
    #[error("PID record error: {0}")]
    PidFile(#[from] PidFileError),

    /// Other I/O failure (runtime directory, log files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Helper for constructing a validation error from any displayable message.
    pub fn validation(message: impl Into<String>) -> Self {
        SupervisorError::Validation {
            message: message.into(),
        }
    }
}

/// Error type for PID record file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error reading or writing the PID record.
    #[error("Failed to read PID record: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing the PID record contents.
    #[error("Failed to parse PID record: {0}")]
    Parse(#[from] serde_json::Error),
}
