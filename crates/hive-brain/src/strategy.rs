//! Unified strategy dispatch.
//!
//! [`DecisionStrategy`] is an enum over the five strategy
//! implementations, mirroring how the rest of the workspace dispatches
//! over backends. Construction from a [`StrategyKind`] is cheap (rule
//! tables are shared behind an `Arc`), so the scheduler can build one
//! per decision and hot-swap kinds at run time.

use std::sync::Arc;

use hive_types::{Action, LearningState, Perception, StrategyKind, Traits};

use crate::behavior::BehaviorTreeStrategy;
use crate::config::{BrainConfig, UtilityRule};
use crate::hierarchical::HierarchicalStrategy;
use crate::hybrid::HybridStrategy;
use crate::qlearning::QLearningStrategy;
use crate::utility::UtilityStrategy;

/// A decision strategy instance bound to its configuration.
#[derive(Debug, Clone)]
pub enum DecisionStrategy {
    /// Weighted feature scoring.
    Utility(UtilityStrategy),
    /// Static behavior tree.
    BehaviorTree(BehaviorTreeStrategy),
    /// Tabular Q-learning.
    QLearning(QLearningStrategy),
    /// Goal selector plus sub-strategies.
    Hierarchical(HierarchicalStrategy),
    /// Confidence race between utility, tree, and Q-learning.
    Hybrid(HybridStrategy),
}

/// Shared, hot-swappable strategy factory.
///
/// Holds the parsed [`BrainConfig`] with the utility rule table behind
/// an `Arc` so per-decision strategy construction stays allocation-free.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    rules: Arc<[UtilityRule]>,
    config: BrainConfig,
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new(BrainConfig::default())
    }
}

impl StrategyFactory {
    /// Build a factory over the given configuration.
    pub fn new(config: BrainConfig) -> Self {
        Self {
            rules: config.utility.clone().into(),
            config,
        }
    }

    /// The active configuration.
    pub const fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// Instantiate the strategy for `kind`.
    pub fn build(&self, kind: StrategyKind) -> DecisionStrategy {
        let utility = UtilityStrategy::new(Arc::clone(&self.rules));
        let qlearning = QLearningStrategy::new(self.config.qlearning);
        match kind {
            StrategyKind::Utility => DecisionStrategy::Utility(utility),
            StrategyKind::BehaviorTree => {
                DecisionStrategy::BehaviorTree(BehaviorTreeStrategy::standard())
            }
            StrategyKind::QLearning => DecisionStrategy::QLearning(qlearning),
            StrategyKind::Hierarchical => {
                DecisionStrategy::Hierarchical(HierarchicalStrategy::new(utility, qlearning))
            }
            StrategyKind::Hybrid => {
                DecisionStrategy::Hybrid(HybridStrategy::new(utility, qlearning))
            }
        }
    }
}

impl DecisionStrategy {
    /// Which kind this instance is.
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Utility(_) => StrategyKind::Utility,
            Self::BehaviorTree(_) => StrategyKind::BehaviorTree,
            Self::QLearning(_) => StrategyKind::QLearning,
            Self::Hierarchical(_) => StrategyKind::Hierarchical,
            Self::Hybrid(_) => StrategyKind::Hybrid,
        }
    }

    /// Produce an action for this perception.
    ///
    /// Every strategy except Q-learning ignores `rng` and is a pure
    /// function of its inputs. The result is always well-formed; when a
    /// strategy cannot act it returns the idle fallback with
    /// confidence 0.
    pub fn decide(
        &self,
        perception: &Perception,
        traits: &Traits,
        learning: &mut LearningState,
        rng: &mut dyn rand::RngCore,
    ) -> Action {
        match self {
            Self::Utility(s) => s.decide(perception, traits),
            Self::BehaviorTree(s) => s.decide(perception),
            Self::QLearning(s) => s.decide(perception, learning, rng),
            Self::Hierarchical(s) => s.decide(perception, traits, learning),
            Self::Hybrid(s) => s.decide(perception, traits, learning),
        }
    }

    /// Feed a reward back into the strategy.
    ///
    /// No-op for everything except Q-learning and the strategies that
    /// embed it.
    pub fn learn(
        &self,
        perception: &Perception,
        action: &Action,
        reward: f64,
        learning: &mut LearningState,
    ) {
        match self {
            Self::QLearning(s) => s.learn(perception, action, reward, learning),
            Self::Hierarchical(s) => s.learn(perception, action, reward, learning),
            Self::Hybrid(s) => s.learn(perception, action, reward, learning),
            Self::Utility(_) | Self::BehaviorTree(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn factory_builds_every_kind() {
        let factory = StrategyFactory::default();
        for kind in [
            StrategyKind::Utility,
            StrategyKind::BehaviorTree,
            StrategyKind::QLearning,
            StrategyKind::Hierarchical,
            StrategyKind::Hybrid,
        ] {
            assert_eq!(factory.build(kind).kind(), kind);
        }
    }

    #[test]
    fn every_strategy_returns_well_formed_actions() {
        let factory = StrategyFactory::default();
        let perception = Perception::default();
        let traits = Traits::default();
        let mut rng = StdRng::seed_from_u64(1);

        for kind in [
            StrategyKind::Utility,
            StrategyKind::BehaviorTree,
            StrategyKind::QLearning,
            StrategyKind::Hierarchical,
            StrategyKind::Hybrid,
        ] {
            let strategy = factory.build(kind);
            let mut learning = LearningState::default();
            let action = strategy.decide(&perception, &traits, &mut learning, &mut rng);
            assert!(action.is_well_formed(), "{kind:?} produced malformed action");
        }
    }

    #[test]
    fn non_learning_strategies_ignore_learn() {
        let factory = StrategyFactory::default();
        let strategy = factory.build(StrategyKind::Utility);
        let mut learning = LearningState::default();
        strategy.learn(
            &Perception::default(),
            &Action::idle_fallback(),
            1.0,
            &mut learning,
        );
        assert!(learning.is_empty());
    }

    #[test]
    fn qlearning_strategy_learns() {
        let factory = StrategyFactory::default();
        let strategy = factory.build(StrategyKind::QLearning);
        let mut learning = LearningState::default();
        strategy.learn(
            &Perception::default(),
            &Action::idle_fallback(),
            1.0,
            &mut learning,
        );
        assert_eq!(learning.len(), 1);
    }
}
