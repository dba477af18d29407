//! Error types for apctl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Command execution failed
    #[error(
        "Command '{cmd}' failed{}: {stderr}",
        .code.map(|c| format!(" with code {}", c)).unwrap_or_default()
    )]
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Driver operation failed (interface setup, hostapd, bridge)
    #[error("Driver error: {0}")]
    DriverError(String),
    /// Not supported by the hardware or platform
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The controller task has exited and no longer accepts commands
    #[error("AP controller is no longer running")]
    ControllerGone,
}

impl From<serde_json::Error> for ApError {
    fn from(error: serde_json::Error) -> Self {
        ApError::ParseError(error.to_string())
    }
}

pub type ApResult<T> = Result<T, ApError>;

/// Reason attached to a failed start or a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartFailure {
    /// Any failure without a more specific user-facing cause
    Generic,
    /// The requested band is not supported by the hardware
    NoChannel,
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartFailure::Generic => write!(f, "generic"),
            StartFailure::NoChannel => write!(f, "no-channel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ApError::CommandFailed {
            cmd: "iw dev ap0 del".to_string(),
            code: Some(237),
            stderr: "No such device".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'iw dev ap0 del' failed with code 237: No such device"
        );

        let err = ApError::CommandFailed {
            cmd: "hostapd".to_string(),
            code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "Command 'hostapd' failed: killed");
    }

    #[test]
    fn test_start_failure_display() {
        assert_eq!(StartFailure::Generic.to_string(), "generic");
        assert_eq!(StartFailure::NoChannel.to_string(), "no-channel");
    }
}
