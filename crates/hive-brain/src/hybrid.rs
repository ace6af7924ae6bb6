//! Hybrid strategy: utility, behavior tree, and Q-learning evaluated
//! side by side; the most confident answer wins.
//!
//! Ties resolve in the fixed order utility, behavior tree, Q-learning.
//! The Q-learning member runs its greedy path so the hybrid stays a
//! pure function of its inputs.

use hive_types::{Action, LearningState, Perception, Traits};

use crate::behavior::BehaviorTreeStrategy;
use crate::qlearning::QLearningStrategy;
use crate::utility::UtilityStrategy;

/// The hybrid strategy, owning one instance of each member.
#[derive(Debug, Clone)]
pub struct HybridStrategy {
    utility: UtilityStrategy,
    tree: BehaviorTreeStrategy,
    qlearning: QLearningStrategy,
}

impl HybridStrategy {
    /// Build the hybrid from its members.
    pub fn new(utility: UtilityStrategy, qlearning: QLearningStrategy) -> Self {
        Self {
            utility,
            tree: BehaviorTreeStrategy::standard(),
            qlearning,
        }
    }

    /// Run all three members and keep the most confident action.
    pub fn decide(
        &self,
        perception: &Perception,
        traits: &Traits,
        learning: &mut LearningState,
    ) -> Action {
        let candidates = [
            self.utility.decide(perception, traits),
            self.tree.decide(perception),
            self.qlearning.decide_greedy(perception, learning),
        ];

        // `>` keeps the earliest member on ties: utility, then tree,
        // then Q-learning.
        let mut best: Option<Action> = None;
        for candidate in candidates {
            let better = best
                .as_ref()
                .is_none_or(|current| candidate.confidence > current.confidence);
            if better {
                best = Some(candidate);
            }
        }

        best.unwrap_or_else(Action::idle_fallback)
    }

    /// Feed a reward into the Q-learning member's table.
    pub fn learn(
        &self,
        perception: &Perception,
        action: &Action,
        reward: f64,
        learning: &mut LearningState,
    ) {
        self.qlearning.learn(perception, action, reward, learning);
    }
}
