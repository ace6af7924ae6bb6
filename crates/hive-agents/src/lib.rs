//! Agent registry, team rosters, spawn generation, and the command
//! queue for the hive orchestration platform.
//!
//! # Modules
//!
//! - [`registry`] -- the invariant-checked owner of all agent records
//! - [`queue`] -- bounded priority queue of pending management commands
//! - [`spawn`] -- academy-themed generation of new agents
//! - [`skills`] -- per-department skill catalogs
//! - [`error`] -- registry and queue error types

pub mod error;
pub mod queue;
pub mod registry;
pub mod skills;
pub mod spawn;

pub use error::{QueueError, RegistryError};
pub use queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY};
pub use registry::{DirtySnapshot, Registry};
pub use skills::{DEFAULT_SKILL_MP_COST, Skill};
pub use spawn::SpawnProfile;
