//! Perception snapshot assembled per tick for one agent.
//!
//! A [`Perception`] is a pure value: the decision strategies read it and
//! never reach back into the registry. Positions of nearby entities are
//! relative to the perceiving agent.

use serde::{Deserialize, Serialize};

use crate::agent::{Position, Vitals};
use crate::ids::AgentId;

/// Another agent visible to the perceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyActor {
    /// Identity of the visible agent.
    pub id: AgentId,
    /// Position relative to the perceiver.
    pub offset: Position,
    /// Visible hit points.
    pub hp: u32,
    /// Visible level.
    pub level: u32,
    /// Threat rating in `[0, 1]`.
    pub threat: f64,
}

/// A world item visible to the perceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyItem {
    /// Item identifier.
    pub id: String,
    /// Position relative to the perceiver.
    pub offset: Position,
}

/// A status effect currently active on the perceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Effect name.
    pub name: String,
    /// Seconds until the effect expires.
    pub remaining_secs: f64,
    /// Effect strength in `[0, 1]`.
    pub intensity: f64,
}

/// Everything one agent can see at the start of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Perception {
    /// The perceiver's own vitals.
    pub vitals: Vitals,
    /// Aggregate threat level in `[0, 1]`.
    pub threat_level: f64,
    /// Hostile agents in range, nearest first.
    pub enemies: Vec<NearbyActor>,
    /// Friendly agents in range, nearest first.
    pub allies: Vec<NearbyActor>,
    /// Items in range.
    pub items: Vec<NearbyItem>,
    /// Active status effects on the perceiver.
    pub effects: Vec<StatusEffect>,
}

impl Perception {
    /// Distance to the nearest enemy, if any.
    pub fn nearest_enemy_distance(&self) -> Option<f64> {
        self.enemies
            .iter()
            .map(|e| f64::from(e.offset.distance_to(&Position::default())))
            .fold(None, |best, d| match best {
                Some(b) if b <= d => Some(b),
                _ => Some(d),
            })
    }

    /// The nearest enemy, if any.
    pub fn nearest_enemy(&self) -> Option<&NearbyActor> {
        self.enemies.iter().min_by(|a, b| {
            let origin = Position::default();
            let da = a.offset.distance_to(&origin);
            let db = b.offset.distance_to(&origin);
            da.partial_cmp(&db).unwrap_or(core::cmp::Ordering::Equal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: AgentId, x: f32) -> NearbyActor {
        NearbyActor {
            id,
            offset: Position::new(x, 0.0, 0.0),
            hp: 100,
            level: 1,
            threat: 0.5,
        }
    }

    #[test]
    fn nearest_enemy_distance_empty() {
        assert_eq!(Perception::default().nearest_enemy_distance(), None);
    }

    #[test]
    fn nearest_enemy_picks_closest() {
        let near = AgentId::new();
        let far = AgentId::new();
        let perception = Perception {
            enemies: vec![actor(far, 50.0), actor(near, 5.0)],
            ..Perception::default()
        };
        assert_eq!(perception.nearest_enemy().map(|e| e.id), Some(near));
        let distance = perception.nearest_enemy_distance();
        assert!(distance.is_some_and(|d| (d - 5.0).abs() < 1e-6));
    }
}
