//! Utility-based strategy: weighted feature scoring over candidate
//! action types.
//!
//! For every feasible action type the scorer sums its weight rules, each
//! applied to a clamped and normalized perception feature. The highest
//! score wins; confidence is the winner's share of the total score mass.
//! Ties break by action priority, then by the canonical action order.

use std::sync::Arc;

use hive_types::{Action, ActionType, Perception, Traits};

use crate::candidates::{self, default_priority};
use crate::config::{Feature, UtilityRule};

/// Distance substituted when no enemy is visible, so distance rules
/// see "very far" rather than a hole.
const NO_ENEMY_DISTANCE: f64 = 1_000.0;

/// The utility strategy; cheap to clone, rules are shared.
#[derive(Debug, Clone)]
pub struct UtilityStrategy {
    rules: Arc<[UtilityRule]>,
}

impl UtilityStrategy {
    /// Build a scorer over the given weight rules.
    pub fn new(rules: Arc<[UtilityRule]>) -> Self {
        Self { rules }
    }

    /// Score every feasible action type and return the winner.
    ///
    /// Pure: equal inputs produce equal outputs.
    pub fn decide(&self, perception: &Perception, traits: &Traits) -> Action {
        let mut scores: Vec<(ActionType, f64)> = Vec::with_capacity(ActionType::ALL.len());
        let mut total = 0.0_f64;

        for action_type in ActionType::ALL {
            if candidates::synthesize(action_type, perception).is_none() {
                continue;
            }
            let score = self.score(action_type, perception, traits);
            if score > 0.0 {
                total += score;
            }
            scores.push((action_type, score));
        }

        let winner = scores
            .iter()
            .copied()
            .max_by(|(a_type, a_score), (b_type, b_score)| {
                a_score
                    .partial_cmp(b_score)
                    .unwrap_or(core::cmp::Ordering::Equal)
                    // Ties: higher priority wins, then lexically earlier
                    // action-type name.
                    .then_with(|| {
                        default_priority(*a_type).cmp(&default_priority(*b_type))
                    })
                    .then_with(|| b_type.as_str().cmp(a_type.as_str()))
            });

        let Some((action_type, score)) = winner else {
            return Action::idle_fallback();
        };

        let confidence = if total > 0.0 { (score / total).clamp(0.0, 1.0) } else { 0.0 };

        candidates::synthesize(action_type, perception).map_or_else(Action::idle_fallback, |parameters| {
            Action::new(parameters, confidence, default_priority(action_type))
        })
    }

    /// Sum this action type's weight rules, clamped at zero.
    fn score(&self, action_type: ActionType, perception: &Perception, traits: &Traits) -> f64 {
        let raw: f64 = self
            .rules
            .iter()
            .filter(|rule| rule.action == action_type)
            .map(|rule| rule.weight * normalize(feature_value(rule.feature, perception), rule.min, rule.max))
            .sum();

        (raw * trait_modifier(action_type, traits)).max(0.0)
    }
}

/// Extract the raw value of a feature from the perception.
fn feature_value(feature: Feature, perception: &Perception) -> f64 {
    match feature {
        Feature::HpRatio => perception.vitals.hp_ratio(),
        Feature::MpRatio => perception.vitals.mp_ratio(),
        Feature::ThreatLevel => perception.threat_level.clamp(0.0, 1.0),
        Feature::EnemyDistance => perception
            .nearest_enemy_distance()
            .unwrap_or(NO_ENEMY_DISTANCE),
        Feature::AllyCount => {
            let count = u32::try_from(perception.allies.len()).unwrap_or(u32::MAX);
            f64::from(count)
        }
    }
}

/// Clamp `value` into the rule's interval and normalize to `[0, 1]`.
///
/// When `min > max` the direction inverts: low raw values normalize
/// towards 1. A degenerate interval normalizes to 0.
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 0.0;
    }
    if min < max {
        (value.clamp(min, max) - min) / (max - min)
    } else {
        (min - value.clamp(max, min)) / (min - max)
    }
}

/// Behavioral traits scale combat and social appetites.
fn trait_modifier(action_type: ActionType, traits: &Traits) -> f64 {
    match action_type {
        ActionType::Attack | ActionType::UseSkill => 0.5 + traits.aggression,
        ActionType::Chat | ActionType::Interact => 0.5 + traits.sociability,
        ActionType::Flee => 1.5 - traits.aggression * 0.5,
        ActionType::Move | ActionType::UseItem | ActionType::Idle => 1.0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hive_types::{AgentId, NearbyActor, Position, Vitals};

    use crate::config::default_utility_rules;

    use super::*;

    fn strategy() -> UtilityStrategy {
        UtilityStrategy::new(default_utility_rules().into())
    }

    fn enemy() -> NearbyActor {
        NearbyActor {
            id: AgentId::new(),
            offset: Position::new(4.0, 0.0, 0.0),
            hp: 800,
            level: 10,
            threat: 0.7,
        }
    }

    fn threatened_perception(hp: u32) -> Perception {
        Perception {
            vitals: Vitals {
                hp,
                max_hp: 1000,
                mp: 400,
                max_mp: 500,
                level: 10,
                xp: 0,
            },
            threat_level: 0.8,
            enemies: vec![enemy()],
            ..Perception::default()
        }
    }

    #[test]
    fn healthy_threatened_agent_fights() {
        let action = strategy().decide(&threatened_perception(950), &Traits::default());
        assert!(
            matches!(action.action_type, ActionType::Attack | ActionType::UseSkill),
            "expected combat, got {:?}",
            action.action_type
        );
        assert!(action.confidence > 0.0);
        assert!(action.is_well_formed());
    }

    #[test]
    fn dying_agent_flees() {
        let action = strategy().decide(&threatened_perception(50), &Traits::default());
        assert_eq!(action.action_type, ActionType::Flee);
    }

    #[test]
    fn decide_is_pure() {
        let perception = threatened_perception(600);
        let traits = Traits::default();
        let s = strategy();
        let first = s.decide(&perception, &traits);
        for _ in 0..10 {
            assert_eq!(s.decide(&perception, &traits), first);
        }
    }

    #[test]
    fn confidence_is_winner_share() {
        let action = strategy().decide(&threatened_perception(950), &Traits::default());
        assert!(action.confidence > 0.0 && action.confidence <= 1.0);
    }

    #[test]
    fn no_feasible_scores_falls_back_to_idle() {
        // Empty perception: no enemies, no allies, no items; every rule
        // that could score requires mana or inverse-threat, so the
        // winner is move/idle, never an infeasible action.
        let action = strategy().decide(&Perception::default(), &Traits::default());
        assert!(matches!(
            action.action_type,
            ActionType::Move | ActionType::Idle
        ));
    }

    #[test]
    fn normalize_inverts_when_bounds_swap() {
        assert!((normalize(0.0, 1.0, 0.0) - 1.0).abs() < 1e-9);
        assert!(normalize(1.0, 1.0, 0.0).abs() < 1e-9);
        assert!((normalize(0.25, 0.0, 1.0) - 0.25).abs() < 1e-9);
        assert!(normalize(0.5, 0.5, 0.5).abs() < 1e-9);
    }
}
