//! `PostgreSQL` persistence for the hive engine.
//!
//! # Modules
//!
//! - [`postgres`] -- connection pool and schema bootstrap
//! - [`store`] -- agent upserts, event log, shard status
//! - [`sync`] -- the periodic synchronizer over the registry
//! - [`error`] -- the persistence error type

pub mod error;
pub mod postgres;
pub mod store;
pub mod sync;

pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::AgentStore;
pub use sync::{SyncConfig, Synchronizer};
