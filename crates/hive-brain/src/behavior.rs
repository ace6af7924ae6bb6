//! Behavior-tree strategy.
//!
//! A static tree of sequence, selector, condition, and action nodes is
//! traversed depth-first left-to-right; the first action leaf whose
//! preconditions pass (including payload feasibility) produces the
//! decision. Tree-produced actions carry confidence 0.8; if no leaf
//! fires the strategy returns the idle fallback with confidence 0.

use hive_types::{Action, ActionType, Perception};

use crate::candidates::{self, default_priority};

/// Confidence assigned to any tree-produced action.
const TREE_CONFIDENCE: f64 = 0.8;

/// Predicate evaluated against the perception.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Own hp ratio strictly below the threshold.
    HpBelow(f64),
    /// Own hp ratio at or above the threshold.
    HpAtLeast(f64),
    /// Own mp ratio at or above the threshold.
    MpAtLeast(f64),
    /// Threat level strictly above the threshold.
    ThreatAbove(f64),
    /// Threat level at or below the threshold.
    ThreatAtMost(f64),
    /// At least one enemy is visible.
    EnemiesPresent,
    /// At least one ally is visible.
    AlliesPresent,
    /// At least one item is visible.
    ItemsPresent,
}

impl Condition {
    /// Evaluate against a perception.
    fn holds(&self, perception: &Perception) -> bool {
        match self {
            Self::HpBelow(t) => perception.vitals.hp_ratio() < *t,
            Self::HpAtLeast(t) => perception.vitals.hp_ratio() >= *t,
            Self::MpAtLeast(t) => perception.vitals.mp_ratio() >= *t,
            Self::ThreatAbove(t) => perception.threat_level > *t,
            Self::ThreatAtMost(t) => perception.threat_level <= *t,
            Self::EnemiesPresent => !perception.enemies.is_empty(),
            Self::AlliesPresent => !perception.allies.is_empty(),
            Self::ItemsPresent => !perception.items.is_empty(),
        }
    }
}

/// One node of the behavior tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Succeeds iff every child succeeds, evaluated left to right.
    Sequence(Vec<Node>),
    /// Succeeds with the first succeeding child, evaluated left to right.
    Selector(Vec<Node>),
    /// Succeeds iff the predicate holds.
    Condition(Condition),
    /// Leaf: succeeds iff the action's payload is feasible right now.
    Action(ActionType),
}

/// Result of evaluating a subtree.
enum Outcome {
    /// The subtree succeeded and produced an action.
    Produced(Action),
    /// The subtree succeeded without producing an action (conditions).
    Passed,
    /// The subtree failed.
    Failed,
}

impl Node {
    /// Evaluate this subtree depth-first.
    fn evaluate(&self, perception: &Perception) -> Outcome {
        match self {
            Self::Sequence(children) => {
                let mut produced = None;
                for child in children {
                    match child.evaluate(perception) {
                        Outcome::Failed => return Outcome::Failed,
                        Outcome::Produced(action) => {
                            // First produced action wins within the sequence.
                            if produced.is_none() {
                                produced = Some(action);
                            }
                        }
                        Outcome::Passed => {}
                    }
                }
                produced.map_or(Outcome::Passed, Outcome::Produced)
            }
            Self::Selector(children) => {
                for child in children {
                    match child.evaluate(perception) {
                        Outcome::Failed => {}
                        other => return other,
                    }
                }
                Outcome::Failed
            }
            Self::Condition(condition) => {
                if condition.holds(perception) {
                    Outcome::Passed
                } else {
                    Outcome::Failed
                }
            }
            Self::Action(action_type) => candidates::synthesize(*action_type, perception)
                .map_or(Outcome::Failed, |parameters| {
                    Outcome::Produced(Action::new(
                        parameters,
                        TREE_CONFIDENCE,
                        default_priority(*action_type),
                    ))
                }),
        }
    }
}

/// The behavior-tree strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorTreeStrategy {
    root: Node,
}

impl Default for BehaviorTreeStrategy {
    fn default() -> Self {
        Self::standard()
    }
}

impl BehaviorTreeStrategy {
    /// Build a strategy over a custom tree.
    pub const fn new(root: Node) -> Self {
        Self { root }
    }

    /// The standard combat tree: flee when critical, cast when able,
    /// attack when engaged, socialize when safe, otherwise wander.
    pub fn standard() -> Self {
        Self::new(Node::Selector(vec![
            Node::Sequence(vec![
                Node::Condition(Condition::HpBelow(0.25)),
                Node::Condition(Condition::EnemiesPresent),
                Node::Action(ActionType::Flee),
            ]),
            Node::Sequence(vec![
                Node::Condition(Condition::HpBelow(0.5)),
                Node::Condition(Condition::ItemsPresent),
                Node::Action(ActionType::UseItem),
            ]),
            Node::Sequence(vec![
                Node::Condition(Condition::EnemiesPresent),
                Node::Condition(Condition::MpAtLeast(0.3)),
                Node::Action(ActionType::UseSkill),
            ]),
            Node::Sequence(vec![
                Node::Condition(Condition::EnemiesPresent),
                Node::Action(ActionType::Attack),
            ]),
            Node::Sequence(vec![
                Node::Condition(Condition::AlliesPresent),
                Node::Condition(Condition::ThreatAtMost(0.2)),
                Node::Action(ActionType::Chat),
            ]),
            Node::Action(ActionType::Move),
        ]))
    }

    /// A defensive tree used as the survive-goal sub-strategy: heal,
    /// disengage, and keep distance.
    pub fn defensive() -> Self {
        Self::new(Node::Selector(vec![
            Node::Sequence(vec![
                Node::Condition(Condition::ItemsPresent),
                Node::Condition(Condition::HpBelow(0.6)),
                Node::Action(ActionType::UseItem),
            ]),
            Node::Sequence(vec![
                Node::Condition(Condition::EnemiesPresent),
                Node::Action(ActionType::Flee),
            ]),
            Node::Action(ActionType::Move),
        ]))
    }

    /// Traverse the tree and return the produced action, or the idle
    /// fallback when no leaf fires.
    ///
    /// Pure: equal inputs produce equal outputs.
    pub fn decide(&self, perception: &Perception) -> Action {
        match self.root.evaluate(perception) {
            Outcome::Produced(action) => action,
            Outcome::Passed | Outcome::Failed => Action::idle_fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use hive_types::{AgentId, NearbyActor, NearbyItem, Position, Vitals};

    use super::*;

    fn perception(hp: u32, mp: u32, threat: f64, enemies: usize) -> Perception {
        let enemy = |i: usize| {
            let spread = f32::from(u8::try_from(i).unwrap_or(u8::MAX));
            NearbyActor {
                id: AgentId::new(),
                offset: Position::new(5.0 + spread, 0.0, 0.0),
                hp: 500,
                level: 5,
                threat: 0.5,
            }
        };
        Perception {
            vitals: Vitals {
                hp,
                max_hp: 1000,
                mp,
                max_mp: 500,
                level: 5,
                xp: 0,
            },
            threat_level: threat,
            enemies: (0..enemies).map(enemy).collect(),
            ..Perception::default()
        }
    }

    #[test]
    fn critical_hp_flees() {
        let tree = BehaviorTreeStrategy::standard();
        let action = tree.decide(&perception(100, 400, 0.9, 2));
        assert_eq!(action.action_type, ActionType::Flee);
        assert!((action.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn engaged_with_mana_casts() {
        let tree = BehaviorTreeStrategy::standard();
        let action = tree.decide(&perception(900, 400, 0.5, 1));
        assert_eq!(action.action_type, ActionType::UseSkill);
    }

    #[test]
    fn engaged_without_mana_attacks() {
        let tree = BehaviorTreeStrategy::standard();
        let action = tree.decide(&perception(900, 50, 0.5, 1));
        assert_eq!(action.action_type, ActionType::Attack);
    }

    #[test]
    fn idle_world_wanders() {
        let tree = BehaviorTreeStrategy::standard();
        let action = tree.decide(&perception(900, 400, 0.0, 0));
        assert_eq!(action.action_type, ActionType::Move);
    }

    #[test]
    fn hurt_agent_with_items_heals_first() {
        let tree = BehaviorTreeStrategy::standard();
        let mut p = perception(400, 400, 0.5, 1);
        p.items.push(NearbyItem {
            id: String::from("potion"),
            offset: Position::default(),
        });
        let action = tree.decide(&p);
        assert_eq!(action.action_type, ActionType::UseItem);
    }

    #[test]
    fn decide_is_pure() {
        let tree = BehaviorTreeStrategy::standard();
        let p = perception(700, 300, 0.4, 2);
        let first = tree.decide(&p);
        for _ in 0..10 {
            assert_eq!(tree.decide(&p), first);
        }
    }

    #[test]
    fn empty_selector_falls_back_to_idle() {
        let tree = BehaviorTreeStrategy::new(Node::Selector(Vec::new()));
        let action = tree.decide(&Perception::default());
        assert_eq!(action.action_type, ActionType::Idle);
        assert!(action.confidence.abs() < f64::EPSILON);
    }
}
