//! The persistence synchronizer: periodic dirty-agent batches, pool
//! heartbeats, and retention cleanup.
//!
//! Every `batch_interval` the synchronizer collects the registry's
//! dirty agents and upserts them in one transaction; dirty flags are
//! cleared only for agents whose record version is unchanged when the
//! commit lands, so anything mutated mid-batch is re-included in the
//! next sweep. Failures leave every dirty flag set -- no data is
//! silently dropped -- and switch the loop to the retry interval until
//! the database answers again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use hive_agents::Registry;
use hive_types::AgentId;

use crate::error::DbError;
use crate::store::AgentStore;

/// Synchronizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Interval between dirty-agent batches.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Maximum agents per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Interval between pool heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Interval between retention sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Days an offline agent survives without updates.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Days an event-log row survives.
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u32,
    /// Delay between reconnect attempts while unhealthy.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            batch_size: default_batch_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            retention_days: default_retention_days(),
            event_retention_days: default_event_retention_days(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// The persistence synchronizer.
pub struct Synchronizer {
    registry: Arc<Registry>,
    store: AgentStore,
    config: SyncConfig,
    healthy: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Synchronizer {
    /// Build a synchronizer draining `registry` into `store`.
    pub fn new(registry: Arc<Registry>, store: AgentStore, config: SyncConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            store,
            config,
            healthy: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start the batch, heartbeat, and cleanup tasks.
    pub fn start(&self) {
        let mut tasks = self.lock_tasks();
        tasks.push(tokio::spawn(batch_loop(
            Arc::clone(&self.registry),
            self.store.clone(),
            self.config.clone(),
            Arc::clone(&self.healthy),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            self.store.clone(),
            self.config.clone(),
            Arc::clone(&self.healthy),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(cleanup_loop(
            self.store.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        )));
        info!(
            batch_interval_ms = self.config.batch_interval_ms,
            "Persistence synchronizer started"
        );
    }

    /// Whether the last database operation succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Stop the periodic tasks, then flush one final batch of every
    /// remaining dirty agent.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Synchronizer tasks did not drain within the shutdown budget");
        }

        // Final snapshot of whatever is still dirty.
        if let Err(error) = run_batch(&self.registry, &self.store, usize::MAX).await {
            warn!(%error, "Final persistence flush failed");
        }
        info!("Persistence synchronizer stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Collect and commit one batch; confirm versions on success.
async fn run_batch(
    registry: &Arc<Registry>,
    store: &AgentStore,
    batch_size: usize,
) -> Result<usize, DbError> {
    let dirty = registry.collect_dirty(batch_size);
    if dirty.is_empty() {
        return Ok(0);
    }

    let snapshots: Vec<_> = dirty.iter().map(|entry| entry.snapshot.clone()).collect();
    store.upsert_agents(&snapshots).await?;

    let confirmed: Vec<(AgentId, u64)> = dirty
        .iter()
        .map(|entry| (entry.snapshot.id, entry.version))
        .collect();
    registry.mark_synced(&confirmed, Utc::now());
    Ok(snapshots.len())
}

/// The dirty-agent batch loop.
async fn batch_loop(
    registry: Arc<Registry>,
    store: AgentStore,
    config: SyncConfig,
    healthy: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let batch_period = Duration::from_millis(config.batch_interval_ms.max(1));
    let retry_period = Duration::from_millis(config.retry_interval_ms.max(1));

    loop {
        let period = if healthy.load(Ordering::Relaxed) {
            batch_period
        } else {
            retry_period
        };
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(period) => {
                match run_batch(&registry, &store, config.batch_size).await {
                    Ok(0) => {}
                    Ok(count) => {
                        healthy.store(true, Ordering::Relaxed);
                        debug!(count, "Dirty agents persisted");
                    }
                    Err(error) => {
                        // Dirty flags stay set; the next pass retries.
                        healthy.store(false, Ordering::Relaxed);
                        warn!(%error, "Persistence batch failed, will retry");
                    }
                }
            }
        }
    }
    debug!("Batch loop exited");
}

/// The pool heartbeat loop.
async fn heartbeat_loop(
    store: AgentStore,
    config: SyncConfig,
    healthy: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(period) => {
                match store.pool().heartbeat().await {
                    Ok(()) => {
                        healthy.store(true, Ordering::Relaxed);
                    }
                    Err(error) => {
                        healthy.store(false, Ordering::Relaxed);
                        warn!(%error, "Database heartbeat failed");
                    }
                }
            }
        }
    }
    debug!("Heartbeat loop exited");
}

/// The retention sweep loop.
async fn cleanup_loop(store: AgentStore, config: SyncConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let period = Duration::from_secs(config.cleanup_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(period) => {
                let agent_cutoff = Utc::now()
                    - chrono::Duration::days(i64::from(config.retention_days));
                let event_cutoff = Utc::now()
                    - chrono::Duration::days(i64::from(config.event_retention_days));

                match store.delete_stale_agents(agent_cutoff).await {
                    Ok(removed) if removed > 0 => info!(removed, "Stale offline agents removed"),
                    Ok(_) => {}
                    Err(error) => warn!(%error, "Stale agent cleanup failed"),
                }
                match store.delete_old_events(event_cutoff).await {
                    Ok(removed) if removed > 0 => info!(removed, "Old events removed"),
                    Ok(_) => {}
                    Err(error) => warn!(%error, "Event cleanup failed"),
                }
            }
        }
    }
    debug!("Cleanup loop exited");
}

const fn default_batch_interval_ms() -> u64 {
    5_000
}

const fn default_batch_size() -> usize {
    500
}

const fn default_heartbeat_interval_secs() -> u64 {
    60
}

const fn default_cleanup_interval_secs() -> u64 {
    86_400
}

const fn default_retention_days() -> u32 {
    60
}

const fn default_event_retention_days() -> u32 {
    30
}

const fn default_retry_interval_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_stable() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_interval_ms, 5_000);
        assert_eq!(config.heartbeat_interval_secs, 60);
        assert_eq!(config.cleanup_interval_secs, 86_400);
        assert_eq!(config.retention_days, 60);
        assert_eq!(config.event_retention_days, 30);
        assert_eq!(config.retry_interval_ms, 5_000);
    }
}
