//! Hierarchical strategy: a goal selector over a coarse feature set,
//! with a per-goal sub-strategy producing the concrete action.
//!
//! The top tier scores the four goal categories with the utility rule
//! applied to coarse features (health deficit, threat, safety, company).
//! The winning goal's sub-strategy then decides; the final confidence is
//! `goal_confidence × sub_confidence`.

use hive_types::{Action, LearningState, Perception, Traits};

use crate::behavior::BehaviorTreeStrategy;
use crate::qlearning::QLearningStrategy;
use crate::utility::UtilityStrategy;

/// The four goal categories the top tier chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Stay alive: heal, disengage, keep distance.
    Survive,
    /// Fight: attack and cast.
    Engage,
    /// Wander and learn the surroundings.
    Explore,
    /// Seek out allies and chat.
    Socialize,
}

impl Goal {
    /// All goals in scoring order.
    const ALL: [Self; 4] = [Self::Survive, Self::Engage, Self::Explore, Self::Socialize];
}

/// The hierarchical strategy, owning its sub-strategies.
#[derive(Debug, Clone)]
pub struct HierarchicalStrategy {
    survive: BehaviorTreeStrategy,
    engage: UtilityStrategy,
    explore: QLearningStrategy,
    socialize: UtilityStrategy,
}

impl HierarchicalStrategy {
    /// Build the two-tier strategy from its sub-strategies.
    pub fn new(engage: UtilityStrategy, explore: QLearningStrategy) -> Self {
        Self {
            survive: BehaviorTreeStrategy::defensive(),
            socialize: engage.clone(),
            engage,
            explore,
        }
    }

    /// Pick a goal, then delegate to its sub-strategy.
    ///
    /// Pure given fixed learning state: the explore sub-strategy runs
    /// the greedy (ε = 0) Q-learning path.
    pub fn decide(
        &self,
        perception: &Perception,
        traits: &Traits,
        learning: &mut LearningState,
    ) -> Action {
        let (goal, goal_confidence) = select_goal(perception, traits);

        let mut action = match goal {
            Goal::Survive => self.survive.decide(perception),
            Goal::Engage => self.engage.decide(perception, traits),
            Goal::Explore => self.explore.decide_greedy(perception, learning),
            Goal::Socialize => self.socialize.decide(perception, traits),
        };

        action.confidence = (goal_confidence * action.confidence).clamp(0.0, 1.0);
        action
    }

    /// Feed a reward into the explore tier's Q-table.
    pub fn learn(
        &self,
        perception: &Perception,
        action: &Action,
        reward: f64,
        learning: &mut LearningState,
    ) {
        self.explore.learn(perception, action, reward, learning);
    }
}

/// Score the goal categories on coarse features and return the winner
/// with its confidence share.
fn select_goal(perception: &Perception, traits: &Traits) -> (Goal, f64) {
    let hp_deficit = 1.0 - perception.vitals.hp_ratio();
    let threat = perception.threat_level.clamp(0.0, 1.0);
    let enemies_present = if perception.enemies.is_empty() { 0.0 } else { 1.0 };
    let company = {
        let count = u32::try_from(perception.allies.len()).unwrap_or(u32::MAX);
        (f64::from(count) / 4.0).clamp(0.0, 1.0)
    };

    let score_of = |goal: Goal| -> f64 {
        let raw = match goal {
            Goal::Survive => hp_deficit.mul_add(1.2, threat * 0.6),
            Goal::Engage => {
                enemies_present * threat.mul_add(0.8, 0.4) * (0.5 + traits.aggression)
            }
            Goal::Explore => (1.0 - threat) * (1.0 - company) * 0.5,
            Goal::Socialize => company * (1.0 - threat) * (0.5 + traits.sociability),
        };
        raw.max(0.0)
    };

    let mut best = Goal::Explore;
    let mut best_score = f64::NEG_INFINITY;
    let mut total = 0.0;
    for goal in Goal::ALL {
        let score = score_of(goal);
        total += score;
        if score > best_score {
            best_score = score;
            best = goal;
        }
    }

    let confidence = if total > 0.0 {
        (best_score / total).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (best, confidence)
}
