//! LLM dispatch layer for the hive engine.
//!
//! A bounded ingress queue fans out to one or more HTTP language-model
//! backends with per-backend concurrency caps, periodic health probes,
//! transparent retries, and streaming delivery of partial responses.
//!
//! # Modules
//!
//! - [`dispatcher`] -- coordinator, selection, retries, statistics
//! - [`backend`] -- per-backend HTTP operations and health state
//! - [`request`] -- request, event, and catalog types
//! - [`config`] -- dispatcher configuration
//! - [`error`] -- error types and retriability

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod request;

pub use backend::{Backend, GenerationOutcome};
pub use config::{BackendConfig, LlmConfig};
pub use dispatcher::{DispatcherStats, LlmDispatcher};
pub use error::LlmError;
pub use request::{LlmEvent, LlmRequest, ModelInfo, SamplingParams};
