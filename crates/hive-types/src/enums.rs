//! Enumeration types shared across the hive workspace.
//!
//! Academies and departments travel the wire and the database as small
//! integer codes (matching the management console's protocol), so both
//! enums serialize via their numeric code. Lifecycle states serialize as
//! snake_case strings on the wire but expose an integer [`code`] for the
//! `agents.state` database column.
//!
//! [`code`]: LifecycleState::code

use serde::{Deserialize, Serialize};

/// One of the three cultural academies an agent belongs to.
///
/// The academy influences naming and flavor only; it has no combat
/// mechanics attached. Codes 1..=3 are fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Academy {
    /// 聖門 -- the Sacred Gate academy (code 1).
    Seongmun,
    /// 懸岩 -- the Hanging Cliff academy (code 2).
    Hyonryon,
    /// 鳳凰 -- the Phoenix academy (code 3).
    Bongcheon,
}

impl Academy {
    /// All academies in code order.
    pub const ALL: [Self; 3] = [Self::Seongmun, Self::Hyonryon, Self::Bongcheon];

    /// The wire/database code for this academy.
    pub const fn code(self) -> u8 {
        match self {
            Self::Seongmun => 1,
            Self::Hyonryon => 2,
            Self::Bongcheon => 3,
        }
    }

    /// The display name used in generated agent names and logs.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Seongmun => "聖門",
            Self::Hyonryon => "懸岩",
            Self::Bongcheon => "鳳凰",
        }
    }
}

impl From<Academy> for u8 {
    fn from(academy: Academy) -> Self {
        academy.code()
    }
}

impl TryFrom<u8> for Academy {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Seongmun),
            2 => Ok(Self::Hyonryon),
            3 => Ok(Self::Bongcheon),
            other => Err(format!("unknown academy code: {other}")),
        }
    }
}

/// One of the four combat departments (roles) an agent trains in.
///
/// The department selects the agent's skill catalog. Codes 1..=4 are
/// fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Department {
    /// 劍術 -- sword fighting (code 1).
    Sword,
    /// 弓術 -- archery (code 2).
    Bow,
    /// 格鬥 -- hand-to-hand martial arts (code 3).
    Martial,
    /// 氣功 -- qigong support and healing (code 4).
    Qigong,
}

impl Department {
    /// All departments in code order.
    pub const ALL: [Self; 4] = [Self::Sword, Self::Bow, Self::Martial, Self::Qigong];

    /// The wire/database code for this department.
    pub const fn code(self) -> u8 {
        match self {
            Self::Sword => 1,
            Self::Bow => 2,
            Self::Martial => 3,
            Self::Qigong => 4,
        }
    }

    /// The display name used in logs and generated flavor text.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Sword => "劍術",
            Self::Bow => "弓術",
            Self::Martial => "格鬥",
            Self::Qigong => "氣功",
        }
    }
}

impl From<Department> for u8 {
    fn from(department: Department) -> Self {
        department.code()
    }
}

impl TryFrom<u8> for Department {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Sword),
            2 => Ok(Self::Bow),
            3 => Ok(Self::Martial),
            4 => Ok(Self::Qigong),
            other => Err(format!("unknown department code: {other}")),
        }
    }
}

/// Lifecycle state of an agent.
///
/// `Dead` is entered iff hp reaches 0 and left only by an explicit
/// respawn. On the wire this serializes as a snake_case string; the
/// database stores the integer [`code`](Self::code).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not currently simulated.
    Offline,
    /// Simulated but doing nothing.
    #[default]
    Idle,
    /// Moving towards a target position.
    Moving,
    /// Engaged in combat.
    Fighting,
    /// Executing a skill.
    UsingSkill,
    /// Chatting with nearby agents.
    Chatting,
    /// Working on a quest.
    Questing,
    /// Dead; awaiting respawn.
    Dead,
    /// Returning to base after death or retreat.
    Returning,
}

impl LifecycleState {
    /// Integer code stored in the `agents.state` database column.
    pub const fn code(self) -> i16 {
        match self {
            Self::Offline => 0,
            Self::Idle => 1,
            Self::Moving => 2,
            Self::Fighting => 3,
            Self::UsingSkill => 4,
            Self::Chatting => 5,
            Self::Questing => 6,
            Self::Dead => 7,
            Self::Returning => 8,
        }
    }

    /// Inverse of [`code`](Self::code); `None` for unknown codes.
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Offline),
            1 => Some(Self::Idle),
            2 => Some(Self::Moving),
            3 => Some(Self::Fighting),
            4 => Some(Self::UsingSkill),
            5 => Some(Self::Chatting),
            6 => Some(Self::Questing),
            7 => Some(Self::Dead),
            8 => Some(Self::Returning),
            _ => None,
        }
    }

    /// The snake_case wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Fighting => "fighting",
            Self::UsingSkill => "using_skill",
            Self::Chatting => "chatting",
            Self::Questing => "questing",
            Self::Dead => "dead",
            Self::Returning => "returning",
        }
    }
}

impl core::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority class of a queued command.
///
/// FIFO order is preserved within a class; higher classes are drained
/// first. Serialized as the numeric level the management console sends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum CommandPriority {
    /// Background work (level 1).
    Low,
    /// Default priority (level 5).
    #[default]
    Normal,
    /// Urgent operations (level 8).
    High,
    /// System control and teardown (level 10).
    Critical,
}

impl CommandPriority {
    /// The numeric priority level.
    pub const fn level(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 5,
            Self::High => 8,
            Self::Critical => 10,
        }
    }
}

impl From<CommandPriority> for u8 {
    fn from(priority: CommandPriority) -> Self {
        priority.level()
    }
}

impl TryFrom<u8> for CommandPriority {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Self::Low),
            5 => Ok(Self::Normal),
            8 => Ok(Self::High),
            10 => Ok(Self::Critical),
            other => Err(format!("unknown command priority level: {other}")),
        }
    }
}

/// The decision strategy currently driving an agent.
///
/// Selectable per agent and hot-swappable at run time. Failing or
/// over-budget agents are demoted to [`Utility`](Self::Utility).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Weighted feature scoring over candidate actions.
    #[default]
    Utility,
    /// Static behavior tree traversal.
    BehaviorTree,
    /// Tabular Q-learning with epsilon-greedy exploration.
    QLearning,
    /// Goal selector plus per-goal sub-strategy.
    Hierarchical,
    /// Utility, behavior tree, and Q-learning raced by confidence.
    Hybrid,
}

/// Shard assignment strategy for the load balancer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// Rotate through enabled shards with a shared counter.
    RoundRobin,
    /// Pick the enabled shard with the fewest agents.
    #[default]
    LeastConnections,
    /// Pick proportional to shard weight.
    Weighted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academy_codes_roundtrip() {
        for academy in Academy::ALL {
            assert_eq!(Academy::try_from(academy.code()).ok(), Some(academy));
        }
        assert!(Academy::try_from(0).is_err());
        assert!(Academy::try_from(4).is_err());
    }

    #[test]
    fn academy_serializes_as_integer() {
        let json = serde_json::to_string(&Academy::Seongmun).ok();
        assert_eq!(json.as_deref(), Some("1"));
        let parsed: Result<Academy, _> = serde_json::from_str("3");
        assert_eq!(parsed.ok(), Some(Academy::Bongcheon));
    }

    #[test]
    fn department_codes_roundtrip() {
        for department in Department::ALL {
            assert_eq!(
                Department::try_from(department.code()).ok(),
                Some(department)
            );
        }
        assert!(Department::try_from(5).is_err());
    }

    #[test]
    fn lifecycle_state_wire_strings() {
        assert_eq!(LifecycleState::UsingSkill.as_str(), "using_skill");
        let json = serde_json::to_string(&LifecycleState::Fighting).ok();
        assert_eq!(json.as_deref(), Some("\"fighting\""));
    }

    #[test]
    fn lifecycle_state_codes_roundtrip() {
        for code in 0..=8 {
            let state = LifecycleState::from_code(code);
            assert!(state.is_some());
            assert_eq!(state.map(LifecycleState::code), Some(code));
        }
        assert_eq!(LifecycleState::from_code(9), None);
    }

    #[test]
    fn command_priority_levels() {
        assert_eq!(CommandPriority::Low.level(), 1);
        assert_eq!(CommandPriority::Normal.level(), 5);
        assert_eq!(CommandPriority::High.level(), 8);
        assert_eq!(CommandPriority::Critical.level(), 10);
        assert!(CommandPriority::try_from(7).is_err());
    }

    #[test]
    fn strategy_kind_serializes_snake_case() {
        let json = serde_json::to_string(&StrategyKind::BehaviorTree).ok();
        assert_eq!(json.as_deref(), Some("\"behavior_tree\""));
    }
}
