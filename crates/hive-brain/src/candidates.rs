//! Candidate action synthesis shared by all strategies.
//!
//! A strategy first scores *action types*; only the winner is turned
//! into a concrete [`ActionParameters`] payload here. Synthesis is
//! deterministic so that every strategy except Q-learning stays a pure
//! function of its inputs.

use hive_types::{ActionParameters, ActionType, Perception, Position};

/// Fixed chat lines; the line is chosen deterministically from the
/// perception so equal inputs produce equal output.
const CHAT_LINES: [&str; 4] = ["並肩作戰！", "這邊安全", "跟我來", "小心腳下"];

/// Relative displacement used when a strategy decides to wander.
const PATROL_STEP: f32 = 12.0;

/// Placeholder skill id resolved against the agent's department catalog
/// by the executor.
pub const AUTO_SKILL: &str = "auto";

/// Default execution priority per action type, used for tie-breaking.
pub const fn default_priority(action_type: ActionType) -> u8 {
    match action_type {
        ActionType::Flee => 8,
        ActionType::Attack => 7,
        ActionType::UseSkill => 6,
        ActionType::UseItem => 5,
        ActionType::Move => 4,
        ActionType::Interact => 3,
        ActionType::Chat => 2,
        ActionType::Idle => 0,
    }
}

/// Build the payload for `action_type` against this perception.
///
/// Returns `None` when the action is infeasible right now (attacking
/// with no visible enemy, chatting with nobody around), which removes
/// the action type from the candidate set.
pub fn synthesize(action_type: ActionType, perception: &Perception) -> Option<ActionParameters> {
    match action_type {
        ActionType::Move => {
            // Wander away from the nearest enemy when one is visible,
            // otherwise patrol forward.
            let target = perception.nearest_enemy().map_or(
                Position::new(PATROL_STEP, 0.0, 0.0),
                |enemy| {
                    Position::new(
                        -enemy.offset.x.signum() * PATROL_STEP,
                        -enemy.offset.y.signum() * PATROL_STEP,
                        0.0,
                    )
                },
            );
            Some(ActionParameters::Move { target })
        }
        ActionType::Attack => perception
            .nearest_enemy()
            .map(|enemy| ActionParameters::Attack { target: enemy.id }),
        ActionType::UseSkill => {
            if perception.enemies.is_empty() && perception.allies.is_empty() {
                None
            } else {
                Some(ActionParameters::UseSkill {
                    skill_id: String::from(AUTO_SKILL),
                    params: serde_json::Value::Null,
                })
            }
        }
        ActionType::UseItem => perception
            .items
            .first()
            .map(|item| ActionParameters::UseItem {
                item_id: item.id.clone(),
            }),
        ActionType::Interact => perception
            .allies
            .first()
            .map(|ally| ActionParameters::Interact { target: ally.id }),
        ActionType::Chat => {
            if perception.allies.is_empty() {
                None
            } else {
                let index = perception.allies.len() % CHAT_LINES.len();
                let line = CHAT_LINES.get(index).copied().unwrap_or("……");
                Some(ActionParameters::Chat {
                    text: String::from(line),
                })
            }
        }
        ActionType::Flee => {
            if perception.enemies.is_empty() {
                None
            } else {
                Some(ActionParameters::Flee)
            }
        }
        ActionType::Idle => Some(ActionParameters::Idle),
    }
}
