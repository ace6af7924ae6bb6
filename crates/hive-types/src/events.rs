//! Engine events bridged to protocol notifications.
//!
//! The scheduler and command handlers emit [`EngineEvent`] values on a
//! broadcast channel; the engine binary maps each one onto the wire
//! notification named by [`EngineEvent::topic`] and fans it out to every
//! connected console session.

use serde::{Deserialize, Serialize};

use crate::agent::Position;
use crate::enums::LifecycleState;
use crate::ids::AgentId;

/// Something observable happened inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An agent's lifecycle state changed.
    StateChange {
        /// The agent that changed.
        agent_id: AgentId,
        /// The new state.
        state: LifecycleState,
        /// The agent's position at the time of the change.
        position: Position,
    },
    /// A combat event (attack, skill hit, kill).
    Battle {
        /// The acting agent.
        agent_id: AgentId,
        /// Event discriminator, e.g. `"attack"`.
        event_type: String,
        /// Event-specific payload.
        data: serde_json::Value,
    },
    /// An engine-wide event (`ai_level_up`, `ai_death`, pause/resume).
    System {
        /// Event discriminator.
        event_type: String,
        /// Event-specific payload.
        data: serde_json::Value,
    },
}

impl EngineEvent {
    /// The wire notification topic this event maps onto.
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::StateChange { .. } => "ai_state_change",
            Self::Battle { .. } => "battle_event",
            Self::System { .. } => "system_event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_match_wire_notifications() {
        let state = EngineEvent::StateChange {
            agent_id: AgentId::new(),
            state: LifecycleState::Fighting,
            position: Position::default(),
        };
        assert_eq!(state.topic(), "ai_state_change");

        let battle = EngineEvent::Battle {
            agent_id: AgentId::new(),
            event_type: String::from("attack"),
            data: serde_json::Value::Null,
        };
        assert_eq!(battle.topic(), "battle_event");

        let system = EngineEvent::System {
            event_type: String::from("ai_level_up"),
            data: serde_json::Value::Null,
        };
        assert_eq!(system.topic(), "system_event");
    }
}
