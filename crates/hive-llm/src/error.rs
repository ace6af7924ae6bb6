//! Error types for the LLM dispatch layer.

/// Errors surfaced by the dispatcher and its backend workers.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The ingress queue is at capacity.
    #[error("llm ingress queue full")]
    QueueFull,

    /// No healthy backend exists to serve the request.
    #[error("no backend available")]
    NoBackendAvailable,

    /// The selected backend is failing its health probes.
    #[error("backend unhealthy: {0}")]
    BackendUnhealthy(String),

    /// The retry budget was exhausted.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
    },

    /// A transport-level failure (connect, read, stream truncation).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend returned a non-success HTTP status.
    #[error("backend returned http {status}")]
    Http {
        /// The HTTP status code.
        status: u16,
    },

    /// The backend's response body could not be parsed.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The dispatcher is shutting down.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl LlmError {
    /// Whether a fresh attempt could succeed: transport failures and
    /// 5xx responses are retriable, 4xx and cancellation are not.
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::MalformedResponse(_) => true,
            Self::Http { status } => *status >= 500,
            Self::QueueFull
            | Self::NoBackendAvailable
            | Self::BackendUnhealthy(_)
            | Self::MaxRetriesExceeded { .. }
            | Self::Cancelled
            | Self::ShutdownInProgress => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_hundreds_are_retriable() {
        assert!(LlmError::Http { status: 500 }.is_retriable());
        assert!(LlmError::Http { status: 503 }.is_retriable());
        assert!(!LlmError::Http { status: 404 }.is_retriable());
        assert!(!LlmError::Http { status: 400 }.is_retriable());
    }

    #[test]
    fn transport_is_retriable_cancel_is_not() {
        assert!(LlmError::Transport(String::from("reset")).is_retriable());
        assert!(!LlmError::Cancelled.is_retriable());
    }
}
