//! Control-channel message shapes (§6 "Control-channel messages"): the
//! `setup`/`run`/`abort` commands a caller sends in and the `response`/
//! `abort` replies the session driver sends back.
//!
//! This module only defines the shapes — it does not open a socket, spawn
//! a listener, or pick a serialization beyond `serde_json::Value` for the
//! opaque `content` payloads; the transport itself is external per §1.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Reason, StatusKind};

/// Commands a caller sends in, keyed by `command`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Setup {
        id: String,
        content: Value,
    },
    Run {
        id: String,
        content: Value,
        /// Absent means a full-tree run from the root.
        #[serde(default)]
        node_pointer: Option<Vec<usize>>,
    },
    Abort {
        id: String,
        #[serde(default)]
        emergency: bool,
    },
}

impl Command {
    pub fn id(&self) -> &str {
        match self {
            Command::Setup { id, .. } => id,
            Command::Run { id, .. } => id,
            Command::Abort { id, .. } => id,
        }
    }
}

/// The interpreter's last-executed-node telemetry, surfaced in a `run`
/// response per §4.G "Logging".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionLogs {
    pub node_name: String,
    pub node_pointer: Vec<usize>,
}

/// Mirrors [`StatusKind`]/[`Reason`] but as the wire's flat
/// `{error_code, message}` shape rather than the internal `Status`
/// struct's field names, per §6's response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStatus {
    pub error_code: StatusKind,
    pub reason: Reason,
    pub message: String,
}

impl From<crate::model::Status> for WireStatus {
    fn from(status: crate::model::Status) -> Self {
        WireStatus {
            error_code: status.kind,
            reason: status.reason,
            message: status.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Response,
    Abort,
}

/// The reply the session driver sends back for every command, correlated
/// by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub completion: bool,
    pub status: WireStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<ExecutionLogs>,
}

impl Response {
    pub fn completed(id: impl Into<String>, status: crate::model::Status, logs: ExecutionLogs) -> Self {
        Response {
            id: id.into(),
            kind: ResponseType::Response,
            completion: true,
            status: status.into(),
            logs: Some(logs),
        }
    }

    pub fn error(id: impl Into<String>, status: crate::model::Status) -> Self {
        Response {
            id: id.into(),
            kind: ResponseType::Response,
            completion: false,
            status: status.into(),
            logs: None,
        }
    }

    pub fn aborted(id: impl Into<String>, status: crate::model::Status) -> Self {
        Response {
            id: id.into(),
            kind: ResponseType::Abort,
            completion: status.is_success(),
            status: status.into(),
            logs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_deserializes_with_optional_node_pointer() {
        let json = serde_json::json!({
            "id": "abc",
            "command": "run",
            "content": {"root": {}},
            "node_pointer": [0, 3]
        });
        let command: Command = serde_json::from_value(json).unwrap();
        match command {
            Command::Run { node_pointer, .. } => assert_eq!(node_pointer, Some(vec![0, 3])),
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn run_command_without_node_pointer_is_full_tree() {
        let json = serde_json::json!({"id": "abc", "command": "run", "content": {}});
        let command: Command = serde_json::from_value(json).unwrap();
        match command {
            Command::Run { node_pointer, .. } => assert_eq!(node_pointer, None),
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn error_code_serializes_screaming_snake_case_on_the_wire() {
        let status = crate::model::Status::aborted("cancelled");
        let wire: WireStatus = status.into();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["error_code"], "ABORTED");
    }
}
