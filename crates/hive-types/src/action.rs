//! Action types emitted by decision strategies.
//!
//! An [`Action`] pairs a tagged [`ActionParameters`] payload with the
//! strategy's confidence and priority. The fieldless [`ActionType`]
//! discriminant doubles as the Q-learning action space and as the wire
//! name of the action in `ai_command` payloads.

use serde::{Deserialize, Serialize};

use crate::agent::Position;
use crate::ids::AgentId;

/// The eight tactical action categories an agent can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Walk towards a target position.
    Move,
    /// Attack a target agent.
    Attack,
    /// Cast a skill from the department catalog.
    UseSkill,
    /// Consume an inventory item.
    UseItem,
    /// Interact with a world object or NPC.
    Interact,
    /// Say something in local chat.
    Chat,
    /// Disengage and run from combat.
    Flee,
    /// Do nothing this tick.
    Idle,
}

impl ActionType {
    /// All action types in canonical (lexical tie-break) order.
    pub const ALL: [Self; 8] = [
        Self::Move,
        Self::Attack,
        Self::UseSkill,
        Self::UseItem,
        Self::Interact,
        Self::Chat,
        Self::Flee,
        Self::Idle,
    ];

    /// The snake_case wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Attack => "attack",
            Self::UseSkill => "use_skill",
            Self::UseItem => "use_item",
            Self::Interact => "interact",
            Self::Chat => "chat",
            Self::Flee => "flee",
            Self::Idle => "idle",
        }
    }

    /// Parse a wire name back into an action type.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for each action category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionParameters {
    /// Walk towards `target`.
    Move {
        /// Destination position.
        target: Position,
    },
    /// Attack the agent identified by `target`.
    Attack {
        /// The victim.
        target: AgentId,
    },
    /// Cast `skill_id` with optional parameters.
    UseSkill {
        /// Skill identifier from the department catalog.
        skill_id: String,
        /// Skill-specific parameters, passed through opaquely.
        params: serde_json::Value,
    },
    /// Consume the item identified by `item_id`.
    UseItem {
        /// Inventory item identifier.
        item_id: String,
    },
    /// Interact with the agent or object identified by `target`.
    Interact {
        /// Interaction target.
        target: AgentId,
    },
    /// Say `text` in local chat.
    Chat {
        /// The chat line.
        text: String,
    },
    /// Disengage from combat.
    Flee,
    /// Do nothing.
    Idle,
}

impl ActionParameters {
    /// The fieldless discriminant for this payload.
    pub const fn action_type(&self) -> ActionType {
        match self {
            Self::Move { .. } => ActionType::Move,
            Self::Attack { .. } => ActionType::Attack,
            Self::UseSkill { .. } => ActionType::UseSkill,
            Self::UseItem { .. } => ActionType::UseItem,
            Self::Interact { .. } => ActionType::Interact,
            Self::Chat { .. } => ActionType::Chat,
            Self::Flee => ActionType::Flee,
            Self::Idle => ActionType::Idle,
        }
    }
}

/// A concrete decision produced by a strategy for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Discriminant of the chosen action.
    pub action_type: ActionType,
    /// Action payload.
    pub parameters: ActionParameters,
    /// Strategy confidence in `[0, 1]`.
    pub confidence: f64,
    /// Execution priority in `[0, 10]`.
    pub priority: u8,
    /// Whether the producing strategy considered the action valid.
    pub valid: bool,
}

impl Action {
    /// Build an action; confidence is clamped to `[0, 1]` and priority
    /// to `[0, 10]`.
    pub fn new(parameters: ActionParameters, confidence: f64, priority: u8) -> Self {
        let clamped = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            action_type: parameters.action_type(),
            parameters,
            confidence: clamped,
            priority: priority.min(10),
            valid: true,
        }
    }

    /// The zero-confidence fallback every strategy returns when it
    /// cannot produce anything better.
    pub const fn idle_fallback() -> Self {
        Self {
            action_type: ActionType::Idle,
            parameters: ActionParameters::Idle,
            confidence: 0.0,
            priority: 0,
            valid: true,
        }
    }

    /// Well-formedness per the data model: finite confidence, bounded
    /// priority, discriminant consistent with the payload, and
    /// type-specific fields populated (a move target must be finite).
    pub fn is_well_formed(&self) -> bool {
        if !self.confidence.is_finite() || self.priority > 10 {
            return false;
        }
        if self.action_type != self.parameters.action_type() {
            return false;
        }
        match &self.parameters {
            ActionParameters::Move { target } => target.is_finite(),
            ActionParameters::UseSkill { skill_id, .. } => !skill_id.is_empty(),
            ActionParameters::UseItem { item_id } => !item_id.is_empty(),
            ActionParameters::Chat { text } => !text.is_empty(),
            ActionParameters::Attack { .. }
            | ActionParameters::Interact { .. }
            | ActionParameters::Flee
            | ActionParameters::Idle => true,
        }
    }
}
