//! AI scheduler and tick engine for the hive orchestration platform.
//!
//! # Modules
//!
//! - [`scheduler`] -- worker pool, command drain, tick sweep, balance
//! - [`perception`] -- per-agent perception assembly

pub mod perception;
pub mod scheduler;

pub use perception::{PERCEPTION_RADIUS, build_perception};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
