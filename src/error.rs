//! Error types for the barricade engine.

use std::path::Path;

use thiserror::Error;

/// Result type alias for barricade operations.
pub type Result<T> = std::result::Result<T, BarricadeError>;

/// Errors that can occur during fault injection operations.
#[derive(Debug, Error)]
pub enum BarricadeError {
    /// A firewall or traffic-shaping command exited non-zero or the
    /// transport failed while running it.
    #[error("command failed: {command} - {reason}")]
    CommandFailed {
        /// The command that failed, as dispatched.
        command: String,
        /// The first stderr fragment or transport error.
        reason: String,
    },

    /// A command did not complete within the configured deadline.
    #[error("command timed out: {command}")]
    Timeout {
        /// The command that was still running at the deadline.
        command: String,
    },

    /// A firewall listing did not match the expected output shape.
    ///
    /// This is an environment/compatibility fault and is fatal to the
    /// calling operation.
    #[error("can't understand iptables output:\n{output}")]
    UnexpectedOutput {
        /// The listing output that could not be parsed.
        output: String,
    },

    /// A session is already initialized at the persistence location.
    #[error("state file {0} exists; destroy the previous session first")]
    AlreadyInitialized(String),

    /// No session exists at the persistence location.
    #[error("no session exists in this context")]
    NotInitialized,

    /// A session record exists but could not be read or parsed.
    #[error("failed to load session state: {0}")]
    InconsistentState(String),

    /// An argument failed validation (empty chain name, missing rule
    /// target, neither source nor destination supplied).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing or deserializing the session record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BarricadeError {
    /// Creates a command failed error.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(command: impl Into<String>) -> Self {
        Self::Timeout {
            command: command.into(),
        }
    }

    /// Creates an unexpected output error from listing lines.
    pub fn unexpected_output(lines: &[String]) -> Self {
        Self::UnexpectedOutput {
            output: lines.join("\n"),
        }
    }

    /// Creates an already initialized error for a state file path.
    pub fn already_initialized(path: &Path) -> Self {
        Self::AlreadyInitialized(path.display().to_string())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<serde_yaml::Error> for BarricadeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
