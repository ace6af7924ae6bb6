//! Agent record, vitals, pose, and behavioral traits.
//!
//! The full [`Agent`] record is owned exclusively by the registry; every
//! other component sees an [`AgentSnapshot`], a flat immutable copy whose
//! serialized field names are fixed by the wire protocol and the
//! `agents` database table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Academy, Department, LifecycleState, StrategyKind};
use crate::ids::{AgentId, ShardId};
use crate::learning::LearningState;

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    /// East-west coordinate.
    pub x: f32,
    /// North-south coordinate.
    pub y: f32,
    /// Vertical coordinate.
    pub z: f32,
}

impl Position {
    /// Create a position from its components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    /// Whether all three components are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Where an agent is and which way it faces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pose {
    /// Current position.
    pub position: Position,
    /// Facing angle in degrees.
    pub facing: f32,
    /// Identifier of the map the agent is on.
    pub map_id: u32,
}

/// Health, mana, and progression values.
///
/// Invariants: `hp <= max_hp` and `mp <= max_mp`, both integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    /// Current hit points.
    pub hp: u32,
    /// Maximum hit points.
    pub max_hp: u32,
    /// Current mana points.
    pub mp: u32,
    /// Maximum mana points.
    pub max_mp: u32,
    /// Character level.
    pub level: u32,
    /// Accumulated experience points.
    pub xp: u64,
}

impl Vitals {
    /// Fraction of hit points remaining, in `[0, 1]`.
    pub fn hp_ratio(&self) -> f64 {
        if self.max_hp == 0 {
            0.0
        } else {
            f64::from(self.hp) / f64::from(self.max_hp)
        }
    }

    /// Fraction of mana remaining, in `[0, 1]`.
    pub fn mp_ratio(&self) -> f64 {
        if self.max_mp == 0 {
            0.0
        } else {
            f64::from(self.mp) / f64::from(self.max_mp)
        }
    }
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            hp: 1000,
            max_hp: 1000,
            mp: 500,
            max_mp: 500,
            level: 1,
            xp: 0,
        }
    }
}

/// Behavioral trait vector; every component is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Traits {
    /// Tendency to seek combat.
    pub aggression: f64,
    /// Quality of tactical decisions.
    pub intelligence: f64,
    /// Tendency to chat and group up.
    pub sociability: f64,
}

impl Default for Traits {
    fn default() -> Self {
        Self {
            aggression: 0.5,
            intelligence: 0.5,
            sociability: 0.5,
        }
    }
}

impl Traits {
    /// Whether every component lies in `[0, 1]`.
    pub fn in_bounds(&self) -> bool {
        let ok = |v: f64| (0.0..=1.0).contains(&v);
        ok(self.aggression) && ok(self.intelligence) && ok(self.sociability)
    }
}

/// The full mutable record for one simulated agent.
///
/// Owned by the registry; mutated only through its `update` operation so
/// the §3 invariants can be enforced in one place. The [`dirty`] flag is
/// set on every successful mutation and cleared by the persistence
/// synchronizer once the row is committed.
///
/// [`dirty`]: Agent::dirty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier.
    pub id: AgentId,
    /// Display name, at most 6 code points.
    pub name: String,
    /// Cultural academy.
    pub academy: Academy,
    /// Combat department.
    pub department: Department,
    /// Team id; 0 means unaffiliated.
    pub team_id: u32,
    /// The shard this agent is bound to.
    pub shard_id: ShardId,
    /// Health, mana, and progression.
    pub vitals: Vitals,
    /// Position, facing, and map.
    pub pose: Pose,
    /// Behavioral traits.
    pub traits: Traits,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// The decision strategy driving this agent.
    pub strategy: StrategyKind,
    /// Personality flavor text generated at spawn.
    pub personality: String,
    /// Combat style flavor text generated at spawn.
    pub combat_style: String,
    /// Signature battle cry generated at spawn.
    pub signature_line: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the scheduler last ticked this agent.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// When the persistence synchronizer last committed this agent.
    pub last_db_sync_at: Option<DateTime<Utc>>,
    /// Whether in-memory state changed since the last committed upsert.
    pub dirty: bool,
    /// Tabular Q-learning state, mutated only by the learning strategy.
    /// Not serialized; it lives and dies with the in-memory record.
    #[serde(skip)]
    pub learning: LearningState,
}

impl Agent {
    /// Build a flat immutable snapshot of this record.
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            academy: self.academy,
            department: self.department,
            team_id: self.team_id,
            shard_id: self.shard_id,
            level: self.vitals.level,
            hp: self.vitals.hp,
            max_hp: self.vitals.max_hp,
            mp: self.vitals.mp,
            max_mp: self.vitals.max_mp,
            xp: self.vitals.xp,
            position: self.pose.position,
            facing: self.pose.facing,
            map_id: self.pose.map_id,
            aggression: self.traits.aggression,
            intelligence: self.traits.intelligence,
            sociability: self.traits.sociability,
            state: self.state,
            strategy: self.strategy,
            created_at: self.created_at,
            last_update: self.last_tick_at.unwrap_or(self.created_at),
        }
    }
}

/// Flat immutable copy of an agent, as returned by registry reads.
///
/// Field names here are wire- and database-facing; do not rename them
/// without updating both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Unique identifier.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Cultural academy (numeric code on the wire).
    pub academy: Academy,
    /// Combat department (numeric code on the wire).
    pub department: Department,
    /// Team id; 0 means unaffiliated.
    pub team_id: u32,
    /// The shard this agent is bound to.
    pub shard_id: ShardId,
    /// Character level.
    pub level: u32,
    /// Current hit points.
    pub hp: u32,
    /// Maximum hit points.
    pub max_hp: u32,
    /// Current mana points.
    pub mp: u32,
    /// Maximum mana points.
    pub max_mp: u32,
    /// Accumulated experience points.
    pub xp: u64,
    /// Current position.
    pub position: Position,
    /// Facing angle in degrees.
    pub facing: f32,
    /// Identifier of the map the agent is on.
    pub map_id: u32,
    /// Aggression trait in `[0, 1]`.
    pub aggression: f64,
    /// Intelligence trait in `[0, 1]`.
    pub intelligence: f64,
    /// Sociability trait in `[0, 1]`.
    pub sociability: f64,
    /// Lifecycle state (snake_case string on the wire).
    pub state: LifecycleState,
    /// Current decision strategy.
    pub strategy: StrategyKind,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last tick (or creation) timestamp.
    pub last_update: DateTime<Utc>,
}
