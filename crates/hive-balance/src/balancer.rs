//! The load balancer: shard table, assignment strategies, health
//! tracking, and the greedy rebalance planner.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use hive_types::{AgentId, BalanceStrategy, ShardId, ShardRecord};

use crate::error::BalanceError;

/// Default fraction of the mean a shard may deviate by before a
/// rebalance is triggered.
const DEFAULT_REBALANCE_TOLERANCE: f64 = 0.15;

/// Default seconds without a heartbeat before a shard is unhealthy.
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 30;

/// Static configuration for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardConfig {
    /// Shard identifier.
    pub id: u16,
    /// Maximum concurrent agents.
    #[serde(default = "default_shard_capacity")]
    pub capacity: u32,
    /// Relative weight for the weighted strategy.
    #[serde(default = "default_shard_weight")]
    pub weight: u32,
    /// Whether the shard participates in assignment.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Balancer configuration, typically one section of the engine config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalancerConfig {
    /// Assignment strategy.
    #[serde(default)]
    pub strategy: BalanceStrategy,
    /// The shard table.
    #[serde(default = "default_shards")]
    pub shards: Vec<ShardConfig>,
    /// Allowed deviation from the mean before rebalancing, as a
    /// fraction in `(0, 1)`.
    #[serde(default = "default_tolerance")]
    pub rebalance_tolerance: f64,
    /// Seconds without a heartbeat before a shard is marked unhealthy.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: BalanceStrategy::default(),
            shards: default_shards(),
            rebalance_tolerance: default_tolerance(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

/// A hot-config patch for one shard; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ShardUpdate {
    /// New capacity, if changing.
    pub capacity: Option<u32>,
    /// New weight, if changing.
    pub weight: Option<u32>,
    /// New enabled flag, if changing.
    pub enabled: Option<bool>,
}

/// One planned agent migration between shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// The agent to move.
    pub agent_id: AgentId,
    /// Source shard.
    pub from: ShardId,
    /// Destination shard.
    pub to: ShardId,
}

/// Mutable balancer state behind the lock.
#[derive(Debug)]
struct Inner {
    shards: BTreeMap<ShardId, ShardRecord>,
    strategy: BalanceStrategy,
    round_robin_cursor: usize,
    tolerance: f64,
    heartbeat_timeout: Duration,
}

/// The load balancer. Cheap to share behind an `Arc`; every operation
/// takes the internal lock briefly.
#[derive(Debug)]
pub struct Balancer {
    inner: Mutex<Inner>,
}

impl Balancer {
    /// Build a balancer from configuration.
    pub fn new(config: &BalancerConfig) -> Self {
        let mut shards = BTreeMap::new();
        for shard in &config.shards {
            let id = ShardId(shard.id);
            let mut record = ShardRecord::new(id, shard.capacity, shard.weight);
            record.enabled = shard.enabled;
            shards.insert(id, record);
        }
        info!(
            shard_count = shards.len(),
            strategy = ?config.strategy,
            "Balancer initialized"
        );
        Self {
            inner: Mutex::new(Inner {
                shards,
                strategy: config.strategy,
                round_robin_cursor: 0,
                tolerance: config.rebalance_tolerance.clamp(0.0, 1.0),
                heartbeat_timeout: Duration::seconds(
                    i64::try_from(config.heartbeat_timeout_secs)
                        .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
                ),
            }),
        }
    }

    /// Choose a shard for a new agent and increment its counter.
    ///
    /// A `hint` naming a shard that can still accept agents wins over
    /// the strategy, which is how spawn requests bias placement.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::CapacityExceeded`] when no enabled,
    /// healthy shard has room.
    pub fn assign(&self, hint: Option<ShardId>) -> Result<ShardId, BalanceError> {
        let mut inner = self.lock();

        if let Some(id) = hint
            && inner.shards.get(&id).is_some_and(ShardRecord::can_accept)
        {
            bump(&mut inner, id);
            return Ok(id);
        }

        let chosen = match inner.strategy {
            BalanceStrategy::RoundRobin => pick_round_robin(&mut inner),
            BalanceStrategy::LeastConnections => pick_least_connections(&inner),
            BalanceStrategy::Weighted => pick_weighted(&inner),
        };

        let id = chosen.ok_or(BalanceError::CapacityExceeded)?;
        bump(&mut inner, id);
        Ok(id)
    }

    /// Decrement a shard's counter after an agent leaves it.
    ///
    /// Underflow is a bookkeeping bug: it asserts in debug builds and
    /// saturates at zero in release builds.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::UnknownShard`] for ids not in the table.
    pub fn release(&self, id: ShardId) -> Result<(), BalanceError> {
        let mut inner = self.lock();
        let record = inner
            .shards
            .get_mut(&id)
            .ok_or(BalanceError::UnknownShard(id))?;
        debug_assert!(record.current > 0, "release on empty shard {id}");
        record.current = record.current.saturating_sub(1);
        Ok(())
    }

    /// Swap the assignment strategy at run time.
    pub fn set_strategy(&self, strategy: BalanceStrategy) {
        let mut inner = self.lock();
        info!(old = ?inner.strategy, new = ?strategy, "Balance strategy changed");
        inner.strategy = strategy;
    }

    /// Apply a hot-config patch to one shard.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::UnknownShard`] for ids not in the table.
    pub fn update_shard(&self, id: ShardId, update: ShardUpdate) -> Result<(), BalanceError> {
        let mut inner = self.lock();
        let record = inner
            .shards
            .get_mut(&id)
            .ok_or(BalanceError::UnknownShard(id))?;
        if let Some(capacity) = update.capacity {
            record.capacity = capacity;
        }
        if let Some(weight) = update.weight {
            record.weight = weight;
        }
        if let Some(enabled) = update.enabled {
            record.enabled = enabled;
        }
        debug!(shard = %id, ?update, "Shard updated");
        Ok(())
    }

    /// Record a heartbeat from a shard, re-marking it healthy.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::UnknownShard`] for ids not in the table.
    pub fn heartbeat(&self, id: ShardId) -> Result<(), BalanceError> {
        let mut inner = self.lock();
        let record = inner
            .shards
            .get_mut(&id)
            .ok_or(BalanceError::UnknownShard(id))?;
        record.last_seen = Utc::now();
        if !record.healthy {
            info!(shard = %id, "Shard recovered");
        }
        record.healthy = true;
        Ok(())
    }

    /// Mark shards that missed their heartbeat window unhealthy.
    ///
    /// Returns the ids that transitioned to unhealthy during this check.
    pub fn check_health(&self, now: DateTime<Utc>) -> Vec<ShardId> {
        let mut inner = self.lock();
        let timeout = inner.heartbeat_timeout;
        let mut dropped = Vec::new();
        for (id, record) in &mut inner.shards {
            if record.healthy && now.signed_duration_since(record.last_seen) > timeout {
                record.healthy = false;
                dropped.push(*id);
            }
        }
        for id in &dropped {
            warn!(shard = %id, "Shard missed heartbeat, marked unhealthy");
        }
        dropped
    }

    /// Snapshot of the full shard table.
    pub fn shards(&self) -> Vec<ShardRecord> {
        self.lock().shards.values().cloned().collect()
    }

    /// Current per-shard agent counts.
    pub fn counts(&self) -> BTreeMap<ShardId, u32> {
        self.lock()
            .shards
            .iter()
            .map(|(id, record)| (*id, record.current))
            .collect()
    }

    /// Sum of all per-shard counters.
    pub fn total_count(&self) -> u64 {
        self.lock()
            .shards
            .values()
            .map(|record| u64::from(record.current))
            .sum()
    }

    /// Plan migrations that balance the population across healthy,
    /// enabled shards.
    ///
    /// `population` maps each shard to the agents currently on it; the
    /// caller (the scheduler's balance task) owns applying the plan
    /// through the registry. Unhealthy or disabled shards are drained
    /// completely. Among the remaining shards, if any count deviates
    /// from the mean by more than the configured tolerance, agents move
    /// one at a time from the fullest to the emptiest shard until the
    /// spread is at most one agent -- any residual imbalance is then
    /// explained by indivisibility alone.
    pub fn rebalance(&self, population: &BTreeMap<ShardId, Vec<AgentId>>) -> Vec<Migration> {
        let inner = self.lock();

        let receivers: Vec<ShardId> = inner
            .shards
            .values()
            .filter(|record| record.enabled && record.healthy)
            .map(|record| record.id)
            .collect();
        if receivers.is_empty() {
            return Vec::new();
        }

        // Working copy: per-shard agent stacks.
        let mut stacks: BTreeMap<ShardId, Vec<AgentId>> = receivers
            .iter()
            .map(|id| (*id, population.get(id).cloned().unwrap_or_default()))
            .collect();

        let mut migrations = Vec::new();

        // Drain shards that can no longer hold agents.
        for (id, agents) in population {
            let drained = inner
                .shards
                .get(id)
                .is_none_or(|record| !(record.enabled && record.healthy));
            if !drained {
                continue;
            }
            for agent_id in agents {
                if let Some(target) = least_loaded(&stacks) {
                    if let Some(stack) = stacks.get_mut(&target) {
                        stack.push(*agent_id);
                    }
                    migrations.push(Migration {
                        agent_id: *agent_id,
                        from: *id,
                        to: target,
                    });
                }
            }
        }

        // Check whether any receiver is outside the tolerance band.
        let total: usize = stacks.values().map(Vec::len).sum();
        let mean = approx_len(total) / approx_len(stacks.len().max(1));
        let out_of_band = stacks.values().any(|agents| {
            let deviation = (approx_len(agents.len()) - mean).abs();
            deviation > mean * inner.tolerance && deviation >= 1.0
        });

        if out_of_band {
            // Greedy: move one agent at a time from the fullest to the
            // emptiest shard until the spread collapses.
            loop {
                let Some(max_id) = most_loaded(&stacks) else { break };
                let Some(min_id) = least_loaded(&stacks) else { break };
                let max_len = stacks.get(&max_id).map_or(0, Vec::len);
                let min_len = stacks.get(&min_id).map_or(0, Vec::len);
                if max_len.saturating_sub(min_len) <= 1 {
                    break;
                }
                let moved = stacks.get_mut(&max_id).and_then(Vec::pop);
                let Some(agent_id) = moved else { break };
                if let Some(stack) = stacks.get_mut(&min_id) {
                    stack.push(agent_id);
                }
                migrations.push(Migration {
                    agent_id,
                    from: max_id,
                    to: min_id,
                });
            }
        }

        if !migrations.is_empty() {
            info!(count = migrations.len(), "Rebalance plan produced");
        }
        migrations
    }

    /// Apply a completed migration to the counters.
    ///
    /// Called by the scheduler after the registry accepted the move.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::UnknownShard`] if either end is missing.
    pub fn record_migration(&self, from: ShardId, to: ShardId) -> Result<(), BalanceError> {
        let mut inner = self.lock();
        if !inner.shards.contains_key(&from) {
            return Err(BalanceError::UnknownShard(from));
        }
        if !inner.shards.contains_key(&to) {
            return Err(BalanceError::UnknownShard(to));
        }
        if let Some(record) = inner.shards.get_mut(&from) {
            record.current = record.current.saturating_sub(1);
        }
        if let Some(record) = inner.shards.get_mut(&to) {
            record.current = record.current.saturating_add(1);
        }
        Ok(())
    }

    /// Take the lock, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Increment a shard's counter.
fn bump(inner: &mut Inner, id: ShardId) {
    if let Some(record) = inner.shards.get_mut(&id) {
        record.current = record.current.saturating_add(1);
    }
}

/// Round-robin pick: advance a shared cursor over accepting shards.
fn pick_round_robin(inner: &mut Inner) -> Option<ShardId> {
    let accepting: Vec<ShardId> = inner
        .shards
        .values()
        .filter(|record| record.can_accept())
        .map(|record| record.id)
        .collect();
    if accepting.is_empty() {
        return None;
    }
    let index = inner.round_robin_cursor % accepting.len();
    inner.round_robin_cursor = inner.round_robin_cursor.wrapping_add(1);
    accepting.get(index).copied()
}

/// Least-connections pick: smallest count, ties by id.
fn pick_least_connections(inner: &Inner) -> Option<ShardId> {
    inner
        .shards
        .values()
        .filter(|record| record.can_accept())
        .min_by_key(|record| (record.current, record.id))
        .map(|record| record.id)
}

/// Weighted pick: the accepting shard with the lowest
/// `current / weight` ratio, which converges to allocation
/// proportional to `weight / sum_of_weights`.
fn pick_weighted(inner: &Inner) -> Option<ShardId> {
    inner
        .shards
        .values()
        .filter(|record| record.can_accept())
        .min_by(|a, b| {
            let ratio = |record: &ShardRecord| {
                f64::from(record.current) / f64::from(record.weight.max(1))
            };
            ratio(a)
                .partial_cmp(&ratio(b))
                .unwrap_or(core::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|record| record.id)
}

/// The shard with the fewest agents in the working set, ties by id.
fn least_loaded(stacks: &BTreeMap<ShardId, Vec<AgentId>>) -> Option<ShardId> {
    stacks
        .iter()
        .min_by_key(|(id, agents)| (agents.len(), **id))
        .map(|(id, _)| *id)
}

/// The shard with the most agents in the working set, ties by id.
fn most_loaded(stacks: &BTreeMap<ShardId, Vec<AgentId>>) -> Option<ShardId> {
    stacks
        .iter()
        .max_by_key(|(id, agents)| (agents.len(), core::cmp::Reverse(**id)))
        .map(|(id, _)| *id)
}

/// Length as f64; shard populations are far below the precision edge.
#[allow(clippy::cast_precision_loss)]
fn approx_len(len: usize) -> f64 {
    len as f64
}

const fn default_shard_capacity() -> u32 {
    10_000
}

const fn default_shard_weight() -> u32 {
    1
}

const fn default_true() -> bool {
    true
}

fn default_shards() -> Vec<ShardConfig> {
    (1..=4)
        .map(|id| ShardConfig {
            id,
            capacity: default_shard_capacity(),
            weight: default_shard_weight(),
            enabled: true,
        })
        .collect()
}

const fn default_tolerance() -> f64 {
    DEFAULT_REBALANCE_TOLERANCE
}

const fn default_heartbeat_timeout() -> u64 {
    30
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn four_shards(capacity: u32) -> BalancerConfig {
        BalancerConfig {
            shards: (1..=4)
                .map(|id| ShardConfig {
                    id,
                    capacity,
                    weight: u32::from(id),
                    enabled: true,
                })
                .collect(),
            ..BalancerConfig::default()
        }
    }

    #[test]
    fn least_connections_balances_evenly() {
        let balancer = Balancer::new(&four_shards(100));
        for _ in 0..40 {
            balancer.assign(None).unwrap();
        }
        let counts = balancer.counts();
        assert!(counts.values().all(|&c| c == 10), "{counts:?}");
    }

    #[test]
    fn round_robin_cycles() {
        let mut config = four_shards(100);
        config.strategy = BalanceStrategy::RoundRobin;
        let balancer = Balancer::new(&config);
        for _ in 0..8 {
            balancer.assign(None).unwrap();
        }
        let counts = balancer.counts();
        assert!(counts.values().all(|&c| c == 2), "{counts:?}");
    }

    #[test]
    fn weighted_allocates_proportionally() {
        let mut config = four_shards(1000);
        config.strategy = BalanceStrategy::Weighted;
        let balancer = Balancer::new(&config);
        // Weights are 1..=4, sum 10; assign 100 agents.
        for _ in 0..100 {
            balancer.assign(None).unwrap();
        }
        let counts = balancer.counts();
        for (id, count) in &counts {
            let expected = u32::from(id.0) * 10;
            let diff = count.abs_diff(expected);
            assert!(diff <= 2, "shard {id}: {count} vs expected {expected}");
        }
    }

    #[test]
    fn hint_overrides_strategy_until_full() {
        let balancer = Balancer::new(&four_shards(2));
        let hinted = ShardId(3);
        assert_eq!(balancer.assign(Some(hinted)).unwrap(), hinted);
        assert_eq!(balancer.assign(Some(hinted)).unwrap(), hinted);
        // Shard 3 is full; the strategy takes over.
        assert_ne!(balancer.assign(Some(hinted)).unwrap(), hinted);
    }

    #[test]
    fn capacity_exhaustion_errors() {
        let balancer = Balancer::new(&four_shards(1));
        for _ in 0..4 {
            balancer.assign(None).unwrap();
        }
        assert_eq!(balancer.assign(None), Err(BalanceError::CapacityExceeded));
    }

    #[test]
    fn release_decrements_and_saturates() {
        let balancer = Balancer::new(&four_shards(10));
        let id = balancer.assign(None).unwrap();
        balancer.release(id).unwrap();
        assert_eq!(balancer.total_count(), 0);
        assert_eq!(
            balancer.release(ShardId(99)),
            Err(BalanceError::UnknownShard(ShardId(99)))
        );
    }

    #[test]
    fn accounting_matches_assignments() {
        let balancer = Balancer::new(&four_shards(100));
        let mut assigned = Vec::new();
        for _ in 0..30 {
            assigned.push(balancer.assign(None).unwrap());
        }
        for id in assigned.iter().take(12) {
            balancer.release(*id).unwrap();
        }
        assert_eq!(balancer.total_count(), 18);
    }

    #[test]
    fn rebalance_spreads_biased_population() {
        // S4: four shards, 80 agents on shard 1, expect counts 19..=21
        // and exactly 60 migrations.
        let balancer = Balancer::new(&four_shards(100));
        let mut population: BTreeMap<ShardId, Vec<AgentId>> = BTreeMap::new();
        let mut on_one = Vec::new();
        for _ in 0..80 {
            let id = balancer.assign(Some(ShardId(1))).unwrap();
            assert_eq!(id, ShardId(1));
            on_one.push(AgentId::new());
        }
        population.insert(ShardId(1), on_one);

        let migrations = balancer.rebalance(&population);
        assert_eq!(migrations.len(), 60);

        // Apply the plan to the counters and verify the band.
        for migration in &migrations {
            balancer.record_migration(migration.from, migration.to).unwrap();
        }
        let counts = balancer.counts();
        for (id, count) in &counts {
            assert!(
                (19..=21).contains(count),
                "shard {id} ended with {count} agents"
            );
        }
        assert_eq!(balancer.total_count(), 80);
    }

    #[test]
    fn rebalance_within_tolerance_is_a_no_op() {
        let balancer = Balancer::new(&four_shards(100));
        let mut population = BTreeMap::new();
        for shard in 1..=4_u16 {
            let agents: Vec<AgentId> = (0..20).map(|_| AgentId::new()).collect();
            for _ in 0..20 {
                balancer.assign(Some(ShardId(shard))).unwrap();
            }
            population.insert(ShardId(shard), agents);
        }
        assert!(balancer.rebalance(&population).is_empty());
    }

    #[test]
    fn unhealthy_shard_is_skipped_and_drained() {
        let balancer = Balancer::new(&four_shards(100));
        // Make shard 2 miss its heartbeat window.
        {
            let mut inner = balancer.lock();
            if let Some(record) = inner.shards.get_mut(&ShardId(2)) {
                record.last_seen = Utc::now() - Duration::seconds(120);
            }
        }
        let dropped = balancer.check_health(Utc::now());
        assert_eq!(dropped, vec![ShardId(2)]);

        // Assignment never lands on the unhealthy shard.
        for _ in 0..30 {
            assert_ne!(balancer.assign(None).unwrap(), ShardId(2));
        }

        // Rebalance drains it.
        let mut population = BTreeMap::new();
        population.insert(ShardId(2), vec![AgentId::new(), AgentId::new()]);
        let migrations = balancer.rebalance(&population);
        assert_eq!(migrations.len(), 2);
        assert!(migrations.iter().all(|m| m.from == ShardId(2)));
        assert!(migrations.iter().all(|m| m.to != ShardId(2)));
    }

    #[test]
    fn heartbeat_recovers_health() {
        let balancer = Balancer::new(&four_shards(100));
        {
            let mut inner = balancer.lock();
            if let Some(record) = inner.shards.get_mut(&ShardId(1)) {
                record.last_seen = Utc::now() - Duration::seconds(120);
            }
        }
        balancer.check_health(Utc::now());
        balancer.heartbeat(ShardId(1)).unwrap();
        let shards = balancer.shards();
        let one = shards.iter().find(|s| s.id == ShardId(1)).unwrap();
        assert!(one.healthy);
    }

    #[test]
    fn update_shard_patches_fields() {
        let balancer = Balancer::new(&four_shards(100));
        balancer
            .update_shard(
                ShardId(1),
                ShardUpdate {
                    capacity: Some(0),
                    weight: None,
                    enabled: None,
                },
            )
            .unwrap();
        // Shard 1 is now full by definition.
        for _ in 0..10 {
            assert_ne!(balancer.assign(None).unwrap(), ShardId(1));
        }
    }
}
