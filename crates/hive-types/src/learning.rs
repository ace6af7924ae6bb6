//! Bounded tabular learning state for Q-learning agents.
//!
//! The table maps a discretized [`StateBucket`] and an [`ActionType`] to
//! a scalar Q-value. Capacity is bounded; when full, the entry with the
//! oldest update sequence number is evicted so the table cannot grow
//! without limit across tens of thousands of agents.

use std::collections::BTreeMap;

use crate::action::ActionType;

/// Default maximum number of Q-table entries per agent.
pub const DEFAULT_QTABLE_CAPACITY: usize = 10_000;

/// A discretized observation used as the Q-table state key.
///
/// Each component is a bucket index in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StateBucket {
    /// Hit-point ratio decile.
    pub hp_decile: u8,
    /// Mana ratio decile.
    pub mp_decile: u8,
    /// Threat level decile.
    pub threat_decile: u8,
    /// Nearest-enemy distance bucket.
    pub distance_bucket: u8,
}

impl StateBucket {
    /// Discretize continuous observations into bucket indices.
    ///
    /// Ratios and threat are expected in `[0, 1]`; distance is bucketed
    /// every 10 world units, capped at bucket 9. Out-of-range inputs are
    /// clamped.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn discretize(hp_ratio: f64, mp_ratio: f64, threat: f64, enemy_distance: f64) -> Self {
        let decile = |v: f64| -> u8 { ((v.clamp(0.0, 1.0) * 10.0) as u8).min(9) };
        let distance_bucket = ((enemy_distance.clamp(0.0, f64::from(u16::MAX)) / 10.0) as u8).min(9);
        Self {
            hp_decile: decile(hp_ratio),
            mp_decile: decile(mp_ratio),
            threat_decile: decile(threat),
            distance_bucket,
        }
    }
}

/// One Q-table cell.
#[derive(Debug, Clone, Copy, PartialEq)]
struct QEntry {
    /// The learned action value.
    value: f64,
    /// Sequence number of the last update, for eviction ordering.
    updated_seq: u64,
}

/// The bounded Q-table carried by each agent.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningState {
    entries: BTreeMap<(StateBucket, ActionType), QEntry>,
    capacity: usize,
    seq: u64,
    /// The bucket observed at the last `decide`, consumed by the next
    /// `learn` call as the transition's starting state.
    pending_bucket: Option<StateBucket>,
}

impl Default for LearningState {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QTABLE_CAPACITY)
    }
}

impl LearningState {
    /// Create an empty table bounded to `capacity` entries.
    ///
    /// A capacity of 0 is treated as 1 so the table stays usable.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
            seq: 0,
            pending_bucket: None,
        }
    }

    /// Record the bucket observed when the last decision was made.
    pub fn set_pending_bucket(&mut self, bucket: StateBucket) {
        self.pending_bucket = Some(bucket);
    }

    /// Consume the bucket recorded by the last decision, if any.
    pub fn take_pending_bucket(&mut self) -> Option<StateBucket> {
        self.pending_bucket.take()
    }

    /// The learned value for `(bucket, action)`, or 0.0 when unseen.
    pub fn value(&self, bucket: StateBucket, action: ActionType) -> f64 {
        self.entries
            .get(&(bucket, action))
            .map_or(0.0, |entry| entry.value)
    }

    /// The best known action and its value for `bucket`.
    ///
    /// Scans the full action space in declaration order, so ties resolve
    /// to the earliest action type. Returns `None` if no action for this
    /// bucket has ever been updated.
    pub fn best(&self, bucket: StateBucket) -> Option<(ActionType, f64)> {
        let mut best: Option<(ActionType, f64)> = None;
        for action in ActionType::ALL {
            if let Some(entry) = self.entries.get(&(bucket, action)) {
                let better = best.is_none_or(|(_, v)| entry.value > v);
                if better {
                    best = Some((action, entry.value));
                }
            }
        }
        best
    }

    /// The maximum learned value for `bucket`, or 0.0 when unseen.
    pub fn max_value(&self, bucket: StateBucket) -> f64 {
        self.best(bucket).map_or(0.0, |(_, v)| v)
    }

    /// Insert or overwrite the value for `(bucket, action)`.
    ///
    /// Bumps the update sequence and evicts the least-recently-updated
    /// entry if the table would exceed its capacity.
    pub fn set(&mut self, bucket: StateBucket, action: ActionType, value: f64) {
        self.seq = self.seq.saturating_add(1);
        self.entries.insert(
            (bucket, action),
            QEntry {
                value,
                updated_seq: self.seq,
            },
        );
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured entry bound.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove the entry with the oldest update sequence.
    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.updated_seq)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
