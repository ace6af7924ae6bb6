//! Protocol error types: the wire error vocabulary and the transport
//! error enum.

use serde::{Deserialize, Serialize};

/// The tagged error kinds external callers can receive in a response's
/// `error` field. Wire strings are snake_case and character-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Registry: no such entity.
    NotFound,
    /// Registry: duplicate entity.
    AlreadyExists,
    /// Registry: the mutation would break a data-model invariant.
    InvariantViolation,
    /// Capacity: a bounded queue rejected the item.
    QueueFull,
    /// Capacity: a subscriber could not keep up with the broadcast.
    Backpressure,
    /// Protocol: undecodable frame (length, UTF-8, JSON, field types).
    BadFrame,
    /// Protocol: no handler for the request's `cmd`.
    UnknownCommand,
    /// Protocol: the handler could not parse the request's `data`.
    MalformedPayload,
    /// Networking: a pending request exhausted its timeout budget.
    RequestTimeout,
    /// Networking: the connection dropped mid-operation.
    ConnectionLost,
    /// Networking: a retried operation ran out of attempts.
    MaxRetriesExceeded,
    /// LLM: the selected backend is failing health checks.
    BackendUnhealthy,
    /// LLM: no healthy backend exists.
    NoBackendAvailable,
    /// Persistence: could not establish a connection.
    ConnectionFailed,
    /// Persistence: a query failed.
    QueryFailed,
    /// Persistence: a batched upsert rolled back.
    BatchFailed,
    /// Lifecycle: the component is stopping and rejects new work.
    ShutdownInProgress,
    /// Capacity: no shard can accept another agent.
    CapacityExceeded,
}

impl ErrorKind {
    /// The exact wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvariantViolation => "invariant_violation",
            Self::QueueFull => "queue_full",
            Self::Backpressure => "backpressure",
            Self::BadFrame => "bad_frame",
            Self::UnknownCommand => "unknown_command",
            Self::MalformedPayload => "malformed_payload",
            Self::RequestTimeout => "request_timeout",
            Self::ConnectionLost => "connection_lost",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::BackendUnhealthy => "backend_unhealthy",
            Self::NoBackendAvailable => "no_backend_available",
            Self::ConnectionFailed => "connection_failed",
            Self::QueryFailed => "query_failed",
            Self::BatchFailed => "batch_failed",
            Self::ShutdownInProgress => "shutdown_in_progress",
            Self::CapacityExceeded => "capacity_exceeded",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reply from a command handler: the wire kind plus optional
/// command-specific data to include alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReply {
    /// The wire error kind.
    pub kind: ErrorKind,
    /// Optional `data` object carried in the error response.
    pub data: Option<serde_json::Value>,
}

impl ErrorReply {
    /// An error reply with no extra data.
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, data: None }
    }

    /// An error reply carrying command-specific data.
    pub const fn with_data(kind: ErrorKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data: Some(data),
        }
    }
}

impl From<ErrorKind> for ErrorReply {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Transport-level errors inside the protocol stack.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent an undecodable frame.
    #[error("bad frame: {0}")]
    BadFrame(String),

    /// A frame exceeded the 16 MB limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// JSON encoding of an outgoing message failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection dropped.
    #[error("connection lost")]
    ConnectionLost,

    /// The client outbox is at capacity.
    #[error("outbox full")]
    QueueFull,

    /// A request exhausted its timeout budget.
    #[error("request timed out")]
    RequestTimeout,

    /// The component is shutting down.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_snake_case() {
        assert_eq!(ErrorKind::BadFrame.as_str(), "bad_frame");
        assert_eq!(ErrorKind::UnknownCommand.as_str(), "unknown_command");
        assert_eq!(
            ErrorKind::ShutdownInProgress.as_str(),
            "shutdown_in_progress"
        );
    }

    #[test]
    fn serde_matches_as_str() {
        let json = serde_json::to_string(&ErrorKind::MaxRetriesExceeded).ok();
        assert_eq!(json.as_deref(), Some("\"max_retries_exceeded\""));
    }
}
