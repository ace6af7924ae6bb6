//! Error types for the agent registry and the command queue.

use hive_types::AgentId;

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No agent with this id exists.
    #[error("agent not found: {0}")]
    NotFound(AgentId),

    /// An agent with this id already exists.
    #[error("agent already exists: {0}")]
    AlreadyExists(AgentId),

    /// A mutation would violate a data-model invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Neither the registry nor any shard can accept another agent.
    #[error("capacity exceeded")]
    CapacityExceeded,
}

impl From<hive_balance::BalanceError> for RegistryError {
    fn from(source: hive_balance::BalanceError) -> Self {
        match source {
            hive_balance::BalanceError::CapacityExceeded => Self::CapacityExceeded,
            hive_balance::BalanceError::UnknownShard(id) => {
                Self::InvariantViolation(format!("unknown shard: {id}"))
            }
        }
    }
}

/// Errors raised by the command queue.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity; the command was rejected.
    #[error("command queue full")]
    QueueFull,
}
