//! LLM dispatcher configuration.

use serde::Deserialize;

use hive_types::BalanceStrategy;

/// One HTTP backend the dispatcher may route to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Stable backend identifier, for logs and stats.
    pub id: String,
    /// Base URL, e.g. `http://localhost:11434`.
    pub base_url: String,
    /// Relative weight for the weighted selection strategy.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Maximum requests in flight against this backend.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Operator toggle; disabled backends are never selected.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Dispatcher configuration, typically one section of the engine config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LlmConfig {
    /// The backend pool.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Retries after the first attempt of a request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between attempts; jittered upward by up to 50%.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Backend selection strategy.
    #[serde(default = "default_strategy")]
    pub strategy: BalanceStrategy,
    /// Bounded ingress queue depth.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds between backend health probes.
    #[serde(default = "default_health_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            default_model: default_model(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            strategy: default_strategy(),
            queue_capacity: default_queue_capacity(),
            health_check_interval_secs: default_health_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig {
        id: String::from("local"),
        base_url: String::from("http://localhost:11434"),
        weight: default_weight(),
        max_concurrent: default_max_concurrent(),
        enabled: true,
    }]
}

fn default_model() -> String {
    String::from("llama3:latest")
}

const fn default_weight() -> u32 {
    1
}

const fn default_max_concurrent() -> u32 {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1_000
}

const fn default_strategy() -> BalanceStrategy {
    BalanceStrategy::LeastConnections
}

const fn default_queue_capacity() -> usize {
    1_000
}

const fn default_health_interval_secs() -> u64 {
    10
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}
