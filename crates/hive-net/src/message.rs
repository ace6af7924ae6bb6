//! Wire message structure.
//!
//! Every frame body is one JSON object with the fields `kind`, `cmd`,
//! `request_id`, `timestamp`, `status`, `error`, and `data`; absent
//! optional fields are omitted entirely. Field names are character-exact
//! protocol surface -- do not rename.
//!
//! Notifications carry their topic in `cmd` (there is no request id to
//! correlate them with), so per-topic ordering can be observed by
//! subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client-to-server command.
    Request,
    /// Server reply correlated by `request_id`.
    Response,
    /// Server push without correlation.
    Notification,
    /// Liveness probe in either direction.
    Heartbeat,
}

/// Response status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The command succeeded.
    Ok,
    /// The command failed; `error` names the kind.
    Error,
}

/// One protocol message, request or response or push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message kind.
    pub kind: MessageKind,

    /// Command name (requests/responses) or notification topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Client-unique request id (requests/responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Milliseconds since the Unix epoch, stamped by the sender.
    pub timestamp: i64,

    /// Response status (responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Error kind string (error responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Command-specific payload; omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WireMessage {
    /// Build a request.
    pub fn request(request_id: &str, cmd: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: MessageKind::Request,
            cmd: Some(cmd.to_owned()),
            request_id: Some(request_id.to_owned()),
            timestamp: now_ms(),
            status: None,
            error: None,
            data,
        }
    }

    /// Build a success response mirroring a request's id and command.
    pub fn response_ok(request_id: &str, cmd: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: MessageKind::Response,
            cmd: Some(cmd.to_owned()),
            request_id: Some(request_id.to_owned()),
            timestamp: now_ms(),
            status: Some(Status::Ok),
            error: None,
            data,
        }
    }

    /// Build an error response mirroring a request's id and command.
    pub fn response_error(
        request_id: &str,
        cmd: &str,
        kind: ErrorKind,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Response,
            cmd: Some(cmd.to_owned()),
            request_id: Some(request_id.to_owned()),
            timestamp: now_ms(),
            status: Some(Status::Error),
            error: Some(kind.as_str().to_owned()),
            data,
        }
    }

    /// Build a notification on the given topic.
    pub fn notification(topic: &str, data: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Notification,
            cmd: Some(topic.to_owned()),
            request_id: None,
            timestamp: now_ms(),
            status: None,
            error: None,
            data: Some(data),
        }
    }

    /// Build a heartbeat.
    pub fn heartbeat() -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            cmd: None,
            request_id: None,
            timestamp: now_ms(),
            status: None,
            error: None,
            data: None,
        }
    }

    /// Structural validation beyond what serde enforces: requests and
    /// responses must carry `cmd` and `request_id`.
    pub fn is_structurally_valid(&self) -> bool {
        match self.kind {
            MessageKind::Request | MessageKind::Response => {
                self.cmd.is_some() && self.request_id.is_some()
            }
            MessageKind::Notification => self.cmd.is_some(),
            MessageKind::Heartbeat => true,
        }
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
