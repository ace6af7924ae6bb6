//! Shard assignment and rebalancing for the hive agent population.
//!
//! The [`Balancer`] owns the shard table and hands out shard ids under a
//! pluggable [`BalanceStrategy`]. The registry calls [`Balancer::assign`]
//! on agent creation and [`Balancer::release`] on deletion, both while
//! holding its own lock, which keeps the per-shard counters equal to the
//! number of agents bound to each shard at all times.
//!
//! Periodic rebalancing produces a greedy migration plan that brings
//! every shard within a configurable tolerance of the mean load; shards
//! that miss heartbeats are marked unhealthy, skipped by assignment, and
//! drained by the next rebalance.

pub mod balancer;
pub mod error;

pub use balancer::{Balancer, BalancerConfig, Migration, ShardConfig, ShardUpdate};
pub use error::BalanceError;
