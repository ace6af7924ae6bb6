//! Game-server shard records held by the load balancer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ShardId;

/// State the balancer tracks for one game-server shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRecord {
    /// Shard identifier (1..=4 in production).
    pub id: ShardId,
    /// Maximum concurrent agents the shard accepts.
    pub capacity: u32,
    /// Number of agents currently bound to the shard.
    pub current: u32,
    /// Relative weight for the weighted assignment strategy.
    pub weight: u32,
    /// Operator toggle; disabled shards are never assigned to.
    pub enabled: bool,
    /// Health derived from heartbeats; unhealthy shards are skipped.
    pub healthy: bool,
    /// When the shard last heartbeated.
    pub last_seen: DateTime<Utc>,
}

impl ShardRecord {
    /// Build a fresh, healthy, empty shard record.
    pub fn new(id: ShardId, capacity: u32, weight: u32) -> Self {
        Self {
            id,
            capacity,
            current: 0,
            weight,
            enabled: true,
            healthy: true,
            last_seen: Utc::now(),
        }
    }

    /// Whether the shard can accept one more agent right now.
    pub const fn can_accept(&self) -> bool {
        self.enabled && self.healthy && self.current < self.capacity
    }

    /// Load as a fraction of capacity, in `[0, 1]`.
    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            f64::from(self.current) / f64::from(self.capacity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_shard_accepts() {
        let shard = ShardRecord::new(ShardId(1), 100, 1);
        assert!(shard.can_accept());
        assert!(shard.load_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn full_or_unhealthy_shard_rejects() {
        let mut shard = ShardRecord::new(ShardId(1), 2, 1);
        shard.current = 2;
        assert!(!shard.can_accept());

        shard.current = 1;
        shard.healthy = false;
        assert!(!shard.can_accept());

        shard.healthy = true;
        shard.enabled = false;
        assert!(!shard.can_accept());
    }

    #[test]
    fn zero_capacity_counts_as_fully_loaded() {
        let shard = ShardRecord::new(ShardId(1), 0, 1);
        assert!((shard.load_ratio() - 1.0).abs() < f64::EPSILON);
        assert!(!shard.can_accept());
    }
}
