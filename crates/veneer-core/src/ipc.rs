use serde::{Deserialize, Serialize};

use crate::priority::ProcessPriority;

/// The named pipe path used for the control endpoint.
pub const PIPE_NAME: &str = r"\\.\pipe\veneer";

/// A command sent to a running session.
///
/// These are serialized as one line of JSON and sent over the named pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// The current effective configuration.
    Settings,
    /// The supervised process identifiers, launcher-filtered per config.
    LaunchedPids,
    /// End the session.
    Shutdown,
    /// Whether the session is alive, and its focus state.
    Status,
    /// Change the session process's scheduling priority.
    SetPriority { priority: ProcessPriority },
}

/// A response sent from the session back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub status: ResponseStatus,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Effective configuration, for [`Command::Settings`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    /// Process identifiers, for [`Command::LaunchedPids`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<Vec<u32>>,
}

/// Status of a session response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl Response {
    /// Creates a successful response with no payload.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: None,
            settings: None,
            pids: None,
        }
    }

    /// Creates a successful response with a message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            settings: None,
            pids: None,
        }
    }

    pub fn with_settings(settings: serde_json::Value) -> Self {
        Self {
            settings: Some(settings),
            ..Self::ok()
        }
    }

    pub fn with_pids(pids: Vec<u32>) -> Self {
        Self {
            pids: Some(pids),
            ..Self::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_tagged() {
        // Act
        let json = serde_json::to_string(&Command::LaunchedPids).unwrap();

        // Assert
        assert_eq!(json, r#"{"command":"LaunchedPids"}"#);
    }

    #[test]
    fn priority_command_carries_its_level() {
        // Act
        let json = serde_json::to_string(&Command::SetPriority {
            priority: ProcessPriority::BelowNormal,
        })
        .unwrap();

        // Assert
        assert_eq!(json, r#"{"command":"SetPriority","priority":"below-normal"}"#);
    }

    #[test]
    fn pids_response_parses() {
        // Arrange
        let line = r#"{"status":"ok","pids":[42,43]}"#;

        // Act
        let response: Response = serde_json::from_str(line).unwrap();

        // Assert
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.pids, Some(vec![42, 43]));
        assert!(response.settings.is_none());
    }

    #[test]
    fn empty_payloads_are_omitted() {
        // Act
        let json = serde_json::to_string(&Response::error("not running")).unwrap();

        // Assert
        assert_eq!(json, r#"{"status":"error","message":"not running"}"#);
    }
}
