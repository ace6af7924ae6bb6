//! Pluggable decision strategies for hive agents.
//!
//! Each strategy maps a [`Perception`] plus the agent's traits and
//! learning state to an [`Action`]. Five implementations exist:
//!
//! - [`UtilityStrategy`] -- weighted feature scoring
//! - [`BehaviorTreeStrategy`] -- static tree traversal
//! - [`QLearningStrategy`] -- tabular Q-learning, epsilon-greedy
//! - [`HierarchicalStrategy`] -- goal selector plus sub-strategies
//! - [`HybridStrategy`] -- the three above raced by confidence
//!
//! [`DecisionStrategy`] unifies them behind one enum; the
//! [`StrategyFactory`] instantiates them from hot-reloadable
//! [`BrainConfig`] values.
//!
//! [`Perception`]: hive_types::Perception
//! [`Action`]: hive_types::Action

pub mod behavior;
pub mod candidates;
pub mod config;
pub mod hierarchical;
pub mod hybrid;
pub mod qlearning;
pub mod strategy;
pub mod utility;

pub use behavior::{BehaviorTreeStrategy, Condition, Node};
pub use config::{BrainConfig, BrainConfigError, Feature, QLearningConfig, UtilityRule};
pub use hierarchical::{Goal, HierarchicalStrategy};
pub use hybrid::HybridStrategy;
pub use qlearning::QLearningStrategy;
pub use strategy::{DecisionStrategy, StrategyFactory};
pub use utility::UtilityStrategy;
