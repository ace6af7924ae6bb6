//! Strategy configuration: utility weight rules and Q-learning
//! hyper-parameters.
//!
//! The utility weight table is a recognized, hot-reloadable config: the
//! scheduler can parse a fresh [`BrainConfig`] from YAML at run time and
//! swap it in without touching agent state.

use std::path::Path;

use serde::Deserialize;

use hive_types::ActionType;

/// Errors raised while loading strategy configuration.
#[derive(Debug, thiserror::Error)]
pub enum BrainConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read brain config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse brain config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for BrainConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// A perception feature the utility scorer can weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Own hp as a fraction of max hp.
    HpRatio,
    /// Own mp as a fraction of max mp.
    MpRatio,
    /// Aggregate threat level.
    ThreatLevel,
    /// Distance to the nearest enemy in world units.
    EnemyDistance,
    /// Number of allies in range.
    AllyCount,
}

/// One weighted scoring rule.
///
/// The raw feature value is clamped to the `[min, max]` interval and
/// normalized into `[0, 1]` before multiplying by `weight`. Declaring
/// `min > max` inverts the normalization, which is how "prefer low hp"
/// rules are written without negative weights.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UtilityRule {
    /// Rule label, for logs and hot-reload diffing.
    pub name: String,
    /// The action type this rule scores.
    pub action: ActionType,
    /// The feature being weighed.
    pub feature: Feature,
    /// Multiplier applied to the normalized feature value.
    pub weight: f64,
    /// Lower clamp bound (or upper, when inverted).
    pub min: f64,
    /// Upper clamp bound (or lower, when inverted).
    pub max: f64,
}

/// Q-learning hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct QLearningConfig {
    /// Exploration probability.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Learning rate α.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Discount factor γ.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            alpha: default_alpha(),
            gamma: default_gamma(),
        }
    }
}

/// Complete strategy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrainConfig {
    /// Utility weight rules; an empty list falls back to the built-in
    /// default table.
    #[serde(default = "default_utility_rules")]
    pub utility: Vec<UtilityRule>,

    /// Q-learning hyper-parameters.
    #[serde(default)]
    pub qlearning: QLearningConfig,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            utility: default_utility_rules(),
            qlearning: QLearningConfig::default(),
        }
    }
}

impl BrainConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`BrainConfigError::Io`] if the file cannot be read, or
    /// [`BrainConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, BrainConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents)?)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`BrainConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }
}

/// Helper for building the default rule table tersely.
fn rule(name: &str, action: ActionType, feature: Feature, weight: f64, min: f64, max: f64) -> UtilityRule {
    UtilityRule {
        name: name.to_owned(),
        action,
        feature,
        weight,
        min,
        max,
    }
}

/// The built-in utility weight table.
///
/// Tuned so healthy, threatened agents fight, hurt agents run, and idle
/// agents wander or socialize.
pub fn default_utility_rules() -> Vec<UtilityRule> {
    vec![
        rule("attack_threat", ActionType::Attack, Feature::ThreatLevel, 0.8, 0.0, 1.0),
        rule("attack_health", ActionType::Attack, Feature::HpRatio, 0.6, 0.0, 1.0),
        rule("attack_close_enemy", ActionType::Attack, Feature::EnemyDistance, 0.5, 100.0, 0.0),
        rule("skill_mana", ActionType::UseSkill, Feature::MpRatio, 0.7, 0.0, 1.0),
        rule("skill_threat", ActionType::UseSkill, Feature::ThreatLevel, 0.4, 0.0, 1.0),
        rule("flee_when_hurt", ActionType::Flee, Feature::HpRatio, 1.0, 1.0, 0.0),
        rule("flee_under_threat", ActionType::Flee, Feature::ThreatLevel, 0.5, 0.0, 1.0),
        rule("move_when_safe", ActionType::Move, Feature::ThreatLevel, 0.3, 1.0, 0.0),
        rule("move_no_enemies", ActionType::Move, Feature::EnemyDistance, 0.2, 0.0, 100.0),
        rule("chat_with_allies", ActionType::Chat, Feature::AllyCount, 0.5, 0.0, 5.0),
        rule("chat_when_safe", ActionType::Chat, Feature::ThreatLevel, 0.2, 1.0, 0.0),
        rule("rest_when_drained", ActionType::Idle, Feature::MpRatio, 0.2, 1.0, 0.0),
    ]
}

const fn default_epsilon() -> f64 {
    0.1
}

const fn default_alpha() -> f64 {
    0.1
}

const fn default_gamma() -> f64 {
    0.9
}
