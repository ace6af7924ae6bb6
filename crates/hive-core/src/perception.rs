//! Perception assembly: what one agent sees at the start of a tick.
//!
//! Visibility is scoped to the agent's shard and map within a fixed
//! radius. Agents of other academies read as enemies; own-academy and
//! own-team agents read as allies. Threat aggregates enemy level and
//! proximity into `[0, 1]`.

use hive_types::{AgentSnapshot, LifecycleState, NearbyActor, Perception, Position, Vitals};

/// How far an agent can see, in world units.
pub const PERCEPTION_RADIUS: f32 = 50.0;

/// Build the perception snapshot for `agent` against the population.
pub fn build_perception(agent: &AgentSnapshot, population: &[AgentSnapshot]) -> Perception {
    let mut enemies = Vec::new();
    let mut allies = Vec::new();

    for other in population {
        if other.id == agent.id
            || other.shard_id != agent.shard_id
            || other.map_id != agent.map_id
            || matches!(other.state, LifecycleState::Offline | LifecycleState::Dead)
        {
            continue;
        }
        let offset = Position::new(
            other.position.x - agent.position.x,
            other.position.y - agent.position.y,
            other.position.z - agent.position.z,
        );
        if offset.distance_to(&Position::default()) > PERCEPTION_RADIUS {
            continue;
        }

        let actor = NearbyActor {
            id: other.id,
            offset,
            hp: other.hp,
            level: other.level,
            threat: threat_rating(agent, other),
        };
        let friendly =
            other.academy == agent.academy || (agent.team_id > 0 && other.team_id == agent.team_id);
        if friendly {
            allies.push(actor);
        } else {
            enemies.push(actor);
        }
    }

    sort_by_distance(&mut enemies);
    sort_by_distance(&mut allies);

    let threat_level = aggregate_threat(&enemies);

    Perception {
        vitals: Vitals {
            hp: agent.hp,
            max_hp: agent.max_hp,
            mp: agent.mp,
            max_mp: agent.max_mp,
            level: agent.level,
            xp: agent.xp,
        },
        threat_level,
        enemies,
        allies,
        items: Vec::new(),
        effects: Vec::new(),
    }
}

/// How threatening `other` is to `agent`, in `[0, 1]`.
fn threat_rating(agent: &AgentSnapshot, other: &AgentSnapshot) -> f64 {
    let level_sum = agent.level.saturating_add(other.level).max(1);
    let level_edge = f64::from(other.level) / f64::from(level_sum);
    let hp_factor = if other.max_hp == 0 {
        0.0
    } else {
        f64::from(other.hp) / f64::from(other.max_hp)
    };
    (level_edge * 0.7 + hp_factor * 0.3).clamp(0.0, 1.0)
}

/// Fold per-enemy threat and proximity into one level.
fn aggregate_threat(enemies: &[NearbyActor]) -> f64 {
    let mut total = 0.0_f64;
    for enemy in enemies {
        let distance = f64::from(enemy.offset.distance_to(&Position::default()));
        let proximity = (1.0 - distance / f64::from(PERCEPTION_RADIUS)).clamp(0.0, 1.0);
        total += enemy.threat * proximity.mul_add(0.5, 0.5);
    }
    total.clamp(0.0, 1.0)
}

/// Order nearest first.
fn sort_by_distance(actors: &mut [NearbyActor]) {
    let origin = Position::default();
    actors.sort_by(|a, b| {
        let da = a.offset.distance_to(&origin);
        let db = b.offset.distance_to(&origin);
        da.partial_cmp(&db).unwrap_or(core::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use hive_agents::{Registry, SpawnProfile};
    use hive_balance::{Balancer, BalancerConfig};
    use hive_types::{Academy, Department, Position as Pos, ShardId, StrategyKind};

    use super::*;

    fn population(positions: &[(Academy, f32, f32)]) -> Vec<AgentSnapshot> {
        let registry = Registry::new(Arc::new(Balancer::new(&BalancerConfig::default())), 1000);
        let mut snapshots = Vec::new();
        for (academy, x, y) in positions {
            let profile = SpawnProfile {
                academy: *academy,
                department: Department::Sword,
                team_id: 0,
                level: 5,
                strategy: StrategyKind::Utility,
            };
            let created = registry.create(&profile, Some(ShardId(1))).unwrap();
            let snapshot = registry
                .update(created.id, |agent| {
                    agent.pose.position = Pos::new(*x, *y, 0.0);
                    agent.snapshot()
                })
                .unwrap();
            snapshots.push(snapshot);
        }
        snapshots
    }

    #[test]
    fn enemies_and_allies_split_by_academy() {
        let agents = population(&[
            (Academy::Seongmun, 0.0, 0.0),
            (Academy::Seongmun, 5.0, 0.0),
            (Academy::Bongcheon, 10.0, 0.0),
        ]);
        let me = agents.first().unwrap();
        let perception = build_perception(me, &agents);
        assert_eq!(perception.allies.len(), 1);
        assert_eq!(perception.enemies.len(), 1);
        assert!(perception.threat_level > 0.0);
    }

    #[test]
    fn far_agents_are_invisible() {
        let agents = population(&[
            (Academy::Seongmun, 0.0, 0.0),
            (Academy::Bongcheon, 500.0, 500.0),
        ]);
        let me = agents.first().unwrap();
        let perception = build_perception(me, &agents);
        assert!(perception.enemies.is_empty());
        assert!(perception.threat_level.abs() < f64::EPSILON);
    }

    #[test]
    fn enemies_sorted_nearest_first() {
        let agents = population(&[
            (Academy::Seongmun, 0.0, 0.0),
            (Academy::Bongcheon, 30.0, 0.0),
            (Academy::Bongcheon, 5.0, 0.0),
        ]);
        let me = agents.first().unwrap();
        let perception = build_perception(me, &agents);
        assert_eq!(perception.enemies.len(), 2);
        let first = perception.enemies.first().unwrap();
        assert!((first.offset.x - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn offsets_are_relative() {
        let agents = population(&[
            (Academy::Seongmun, 10.0, 10.0),
            (Academy::Bongcheon, 15.0, 10.0),
        ]);
        let me = agents.first().unwrap();
        let perception = build_perception(me, &agents);
        let enemy = perception.enemies.first().unwrap();
        assert!((enemy.offset.x - 5.0).abs() < f32::EPSILON);
        assert!(enemy.offset.y.abs() < f32::EPSILON);
    }
}
