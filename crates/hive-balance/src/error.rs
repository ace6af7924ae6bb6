//! Error types for the load balancer.

use hive_types::ShardId;

/// Errors that can occur during shard assignment and bookkeeping.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BalanceError {
    /// No enabled, healthy shard has room for another agent.
    #[error("no shard can accept another agent")]
    CapacityExceeded,

    /// The named shard is not in the table.
    #[error("unknown shard: {0}")]
    UnknownShard(ShardId),
}
