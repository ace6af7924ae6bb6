//! Engine configuration: one YAML file covering every subsystem.
//!
//! The canonical file is `hive.yaml` in the working directory; the
//! `HIVE_CONFIG` environment variable overrides the path. A missing
//! file yields the built-in defaults; an unreadable or invalid file is
//! a fatal configuration error (exit code 1).
//!
//! Environment overrides, applied after parsing:
//! - `DATABASE_URL` overrides `persistence.connection_string`
//! - `HIVE_LISTEN_HOST` / `HIVE_LISTEN_PORT` override the server bind

use std::path::Path;

use serde::Deserialize;

use hive_balance::BalancerConfig;
use hive_brain::BrainConfig;
use hive_core::SchedulerConfig;
use hive_db::{PostgresConfig, SyncConfig};
use hive_llm::LlmConfig;
use hive_net::ServerConfig;

use crate::error::EngineError;

/// Persistence section: pool settings plus synchronizer cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// Connection pool settings.
    #[serde(flatten)]
    pub postgres: PostgresConfig,
    /// Synchronizer cadence and retention.
    #[serde(flatten)]
    pub sync: SyncConfig,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct EngineConfig {
    /// AI scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Load balancer settings.
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Protocol server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Decision strategy settings.
    #[serde(default)]
    pub brain: BrainConfig,

    /// LLM dispatcher settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Persistence settings; absent means the engine runs without a
    /// database (all state stays in memory).
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
}

impl EngineConfig {
    /// Load the configuration from `HIVE_CONFIG` or `hive.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for unreadable or invalid files.
    pub fn load() -> Result<Self, EngineError> {
        let path = std::env::var("HIVE_CONFIG").unwrap_or_else(|_| String::from("hive.yaml"));
        let path = Path::new(&path);
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|error| EngineError::Config(format!("{}: {error}", path.display())))?;
            Self::parse(&contents)
                .map_err(|error| EngineError::Config(format!("{}: {error}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns the YAML parse error.
    pub fn parse(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }

    /// Apply environment-variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            match &mut self.persistence {
                Some(persistence) => persistence.postgres.connection_string = url,
                None => {
                    self.persistence = Some(PersistenceConfig {
                        postgres: PostgresConfig::new(&url),
                        sync: SyncConfig::default(),
                    });
                }
            }
        }
        if let Ok(host) = std::env::var("HIVE_LISTEN_HOST") {
            self.server.listen_host = host;
        }
        if let Ok(port) = std::env::var("HIVE_LISTEN_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.listen_port = port;
        }
    }
}
