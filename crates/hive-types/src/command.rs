//! Queued management commands.
//!
//! The protocol server translates console requests into [`Command`]
//! values; the scheduler's drain task pulls them off the priority queue
//! and routes them to the registry or an agent mailbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::CommandPriority;
use crate::ids::AgentId;

/// What a queued command does when drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Create one agent from the payload.
    Create,
    /// Mutate the target agent per the payload.
    Update,
    /// Remove the target agent.
    Delete,
    /// Post an encoded action to the target agent's mailbox.
    BroadcastAction,
    /// Engine-wide control (pause, resume, reset).
    SystemControl,
}

/// One pending operation against the agent population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What to do.
    pub kind: CommandKind,
    /// The agent this command targets, when applicable.
    pub target: Option<AgentId>,
    /// Kind-specific payload, passed through opaquely.
    pub payload: serde_json::Value,
    /// Queue priority class.
    pub priority: CommandPriority,
    /// When the command entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl Command {
    /// Build a command stamped with the current time.
    pub fn new(
        kind: CommandKind,
        target: Option<AgentId>,
        payload: serde_json::Value,
        priority: CommandPriority,
    ) -> Self {
        Self {
            kind,
            target,
            payload,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_carries_priority_and_timestamp() {
        let before = Utc::now();
        let command = Command::new(
            CommandKind::Delete,
            Some(AgentId::new()),
            serde_json::Value::Null,
            CommandPriority::High,
        );
        assert_eq!(command.priority, CommandPriority::High);
        assert!(command.enqueued_at >= before);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&CommandKind::BroadcastAction).ok();
        assert_eq!(json.as_deref(), Some("\"broadcast_action\""));
    }
}
