//! Tabular Q-learning strategy with epsilon-greedy exploration.
//!
//! The observation is discretized into a [`StateBucket`]; the action
//! space is the eight [`ActionType`] variants. With probability ε the
//! strategy explores uniformly over the feasible actions, otherwise it
//! exploits the argmax of the bucket's Q-values. The `learn` update is
//! the standard one-step rule:
//!
//! ```text
//! Q ← Q + α (reward + γ · max Q[next, ·] − Q)
//! ```
//!
//! The bucket observed at `decide` time is parked on the agent's
//! [`LearningState`] and consumed as the transition's starting state by
//! the following `learn` call.

use rand::Rng;

use hive_types::{Action, ActionType, LearningState, Perception, StateBucket};

use crate::candidates::{self, default_priority};
use crate::config::QLearningConfig;

/// The Q-learning strategy. Hyper-parameters only; all learned state
/// lives on the agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QLearningStrategy {
    config: QLearningConfig,
}

impl QLearningStrategy {
    /// Build a strategy with the given hyper-parameters.
    pub const fn new(config: QLearningConfig) -> Self {
        Self { config }
    }

    /// The active hyper-parameters.
    pub const fn config(&self) -> &QLearningConfig {
        &self.config
    }

    /// Discretize a perception into its Q-table bucket.
    pub fn bucket(perception: &Perception) -> StateBucket {
        StateBucket::discretize(
            perception.vitals.hp_ratio(),
            perception.vitals.mp_ratio(),
            perception.threat_level,
            perception.nearest_enemy_distance().unwrap_or(100.0),
        )
    }

    /// Epsilon-greedy action selection.
    ///
    /// Records the observed bucket on `learning` so the next `learn`
    /// call can complete the transition.
    pub fn decide(
        &self,
        perception: &Perception,
        learning: &mut LearningState,
        rng: &mut dyn rand::RngCore,
    ) -> Action {
        let bucket = Self::bucket(perception);
        learning.set_pending_bucket(bucket);

        let feasible: Vec<ActionType> = ActionType::ALL
            .into_iter()
            .filter(|a| candidates::synthesize(*a, perception).is_some())
            .collect();

        if feasible.is_empty() {
            return Action::idle_fallback();
        }

        let explore = rng.random_range(0.0..1.0) < self.config.epsilon;
        let action_type = if explore {
            let index = rng.random_range(0..feasible.len());
            feasible.get(index).copied().unwrap_or(ActionType::Idle)
        } else {
            greedy_action(bucket, &feasible, learning)
        };

        let q = learning.value(bucket, action_type);
        let confidence = normalize_q(q);

        candidates::synthesize(action_type, perception).map_or_else(
            Action::idle_fallback,
            |parameters| Action::new(parameters, confidence, default_priority(action_type)),
        )
    }

    /// Deterministic greedy selection (ε = 0 path), used directly by the
    /// hierarchical and hybrid strategies to keep them pure.
    pub fn decide_greedy(&self, perception: &Perception, learning: &mut LearningState) -> Action {
        let bucket = Self::bucket(perception);
        learning.set_pending_bucket(bucket);

        let feasible: Vec<ActionType> = ActionType::ALL
            .into_iter()
            .filter(|a| candidates::synthesize(*a, perception).is_some())
            .collect();
        if feasible.is_empty() {
            return Action::idle_fallback();
        }

        let action_type = greedy_action(bucket, &feasible, learning);
        let confidence = normalize_q(learning.value(bucket, action_type));
        candidates::synthesize(action_type, perception).map_or_else(
            Action::idle_fallback,
            |parameters| Action::new(parameters, confidence, default_priority(action_type)),
        )
    }

    /// Apply the one-step Q update for the transition that ended in
    /// `perception`.
    ///
    /// The starting bucket is the one parked by the last `decide`; when
    /// none is parked (standalone updates in a stationary environment)
    /// the current bucket is used for both ends of the transition.
    pub fn learn(
        &self,
        perception: &Perception,
        action: &Action,
        reward: f64,
        learning: &mut LearningState,
    ) {
        let next_bucket = Self::bucket(perception);
        let prev_bucket = learning.take_pending_bucket().unwrap_or(next_bucket);

        let old = learning.value(prev_bucket, action.action_type);
        let target = self.config.gamma.mul_add(learning.max_value(next_bucket), reward);
        let updated = self.config.alpha.mul_add(target - old, old);
        learning.set(prev_bucket, action.action_type, updated);
    }

}

/// Argmax over the feasible actions; unseen actions count as 0.
/// Ties resolve to the earliest action in canonical order.
fn greedy_action(
    bucket: StateBucket,
    feasible: &[ActionType],
    learning: &LearningState,
) -> ActionType {
    let mut best = ActionType::Idle;
    let mut best_q = f64::NEG_INFINITY;
    for &action in feasible {
        let q = learning.value(bucket, action);
        if q > best_q {
            best_q = q;
            best = action;
        }
    }
    best
}

/// Squash a Q-value into `[0, 1)`: zero and negatives map to 0,
/// positives approach 1 monotonically.
fn normalize_q(q: f64) -> f64 {
    let positive = q.max(0.0);
    positive / (1.0 + positive)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hive_types::{AgentId, NearbyActor, Position, Vitals};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn combat_perception() -> Perception {
        Perception {
            vitals: Vitals {
                hp: 800,
                max_hp: 1000,
                mp: 300,
                max_mp: 500,
                level: 5,
                xp: 0,
            },
            threat_level: 0.6,
            enemies: vec![NearbyActor {
                id: AgentId::new(),
                offset: Position::new(8.0, 0.0, 0.0),
                hp: 500,
                level: 5,
                threat: 0.6,
            }],
            ..Perception::default()
        }
    }

    #[test]
    fn greedy_prefers_highest_q() {
        let strategy = QLearningStrategy::new(QLearningConfig {
            epsilon: 0.0,
            ..QLearningConfig::default()
        });
        let perception = combat_perception();
        let mut learning = LearningState::default();
        let bucket = QLearningStrategy::bucket(&perception);
        learning.set(bucket, ActionType::Flee, 2.0);
        learning.set(bucket, ActionType::Attack, 0.5);

        let mut rng = StdRng::seed_from_u64(7);
        let action = strategy.decide(&perception, &mut learning, &mut rng);
        assert_eq!(action.action_type, ActionType::Flee);
        assert!(action.confidence > 0.5);
    }

    #[test]
    fn exploration_stays_within_feasible_set() {
        let strategy = QLearningStrategy::new(QLearningConfig {
            epsilon: 1.0,
            ..QLearningConfig::default()
        });
        let perception = combat_perception();
        let mut learning = LearningState::default();
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..50 {
            let action = strategy.decide(&perception, &mut learning, &mut rng);
            // No items or allies visible, so these can never be chosen.
            assert!(!matches!(
                action.action_type,
                ActionType::UseItem | ActionType::Interact | ActionType::Chat
            ));
            assert!(action.is_well_formed());
        }
    }

    #[test]
    fn learn_converges_to_discounted_return() {
        // Stationary environment, ε = 0: repeated updates on the same
        // (state, action) must converge to reward / (1 - γ).
        let config = QLearningConfig {
            epsilon: 0.0,
            alpha: 0.1,
            gamma: 0.9,
        };
        let strategy = QLearningStrategy::new(config);
        let perception = combat_perception();
        let mut learning = LearningState::default();

        let action = strategy.decide_greedy(&perception, &mut learning);
        let reward = 1.0;
        for _ in 0..2_000 {
            strategy.learn(&perception, &action, reward, &mut learning);
        }

        let bucket = QLearningStrategy::bucket(&perception);
        let q = learning.value(bucket, action.action_type);
        let true_return = reward / (1.0 - config.gamma);
        assert!(
            (q - true_return).abs() < 0.05,
            "Q={q}, expected ≈ {true_return}"
        );
    }

    #[test]
    fn learn_uses_pending_bucket_from_decide() {
        let strategy = QLearningStrategy::new(QLearningConfig::default());
        let before = combat_perception();
        let mut learning = LearningState::default();

        let action = strategy.decide_greedy(&before, &mut learning);
        let prev_bucket = QLearningStrategy::bucket(&before);

        // The world changed after acting; the update must still land on
        // the bucket observed at decision time.
        let mut after = combat_perception();
        after.vitals.hp = 100;
        strategy.learn(&after, &action, 5.0, &mut learning);

        assert!(learning.value(prev_bucket, action.action_type) > 0.0);
    }

    #[test]
    fn normalize_q_bounds() {
        assert!(normalize_q(-3.0).abs() < f64::EPSILON);
        assert!(normalize_q(0.0).abs() < f64::EPSILON);
        let high = normalize_q(100.0);
        assert!(high > 0.9 && high < 1.0);
    }
}
