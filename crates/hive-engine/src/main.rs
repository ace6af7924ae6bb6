//! The hive engine binary.
//!
//! Wires together the registry, balancer, command queue, scheduler,
//! protocol server, LLM dispatcher, and persistence synchronizer, then
//! runs until interrupted.
//!
//! # Startup sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `hive.yaml` (exit 1 on bad config)
//! 3. Connect and prepare `PostgreSQL` when configured (exit 2 on failure)
//! 4. Construct balancer, registry, queue, and scheduler
//! 5. Start the LLM dispatcher
//! 6. Bind the protocol server and register handlers (exit 3 on failure)
//! 7. Start the scheduler, synchronizer, and notification bridge
//! 8. Wait for ctrl-c, then stop everything within its budget

mod bridge;
mod config;
mod error;
mod handlers;
#[cfg(test)]
mod scenarios;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hive_agents::{CommandQueue, Registry};
use hive_balance::Balancer;
use hive_brain::StrategyFactory;
use hive_core::Scheduler;
use hive_db::{AgentStore, PostgresPool, Synchronizer};
use hive_llm::LlmDispatcher;
use hive_net::ProtocolServer;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handlers::EngineContext;

/// Shutdown budget for the protocol server.
const SERVER_STOP_BUDGET: Duration = Duration::from_secs(10);

/// Shutdown budget for the scheduler.
const SCHEDULER_STOP_BUDGET: Duration = Duration::from_secs(10);

/// Shutdown budget for the LLM dispatcher.
const DISPATCHER_STOP_BUDGET: Duration = Duration::from_secs(5);

/// Shutdown budget for the persistence synchronizer.
const SYNC_STOP_BUDGET: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("hive-engine starting");

    match run().await {
        Ok(()) => {
            info!("hive-engine stopped cleanly");
            ExitCode::SUCCESS
        }
        Err(engine_error) => {
            error!(%engine_error, "hive-engine failed");
            ExitCode::from(engine_error.exit_code())
        }
    }
}

/// Build, run, and tear down the engine.
async fn run() -> Result<(), EngineError> {
    // Configuration.
    let config = EngineConfig::load()?;
    info!(
        tick_interval_ms = config.scheduler.tick_interval_ms,
        max_agents = config.scheduler.max_agents,
        workers = config.scheduler.worker_count(),
        shards = config.balancer.shards.len(),
        "Configuration loaded"
    );

    // Persistence (optional): connect before anything that uses it.
    let store = match &config.persistence {
        Some(persistence) => {
            let pool = PostgresPool::connect(&persistence.postgres).await?;
            pool.ensure_schema().await?;
            Some(AgentStore::new(pool))
        }
        None => {
            warn!("No persistence configured; agent state is memory-only");
            None
        }
    };

    // Core state.
    let balancer = Arc::new(Balancer::new(&config.balancer));
    let registry = Arc::new(Registry::new(
        Arc::clone(&balancer),
        config.scheduler.max_agents,
    ));
    let queue = Arc::new(CommandQueue::default());
    let factory = StrategyFactory::new(config.brain.clone());
    let scheduler = Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        factory,
        config.scheduler.clone(),
    );

    // LLM dispatcher.
    let dispatcher = Arc::new(LlmDispatcher::new(config.llm.clone()));
    dispatcher.start();

    // Protocol server with the command handlers.
    let context = Arc::new(EngineContext {
        registry: Arc::clone(&registry),
        queue: Arc::clone(&queue),
        events: scheduler.events_sender(),
        dispatcher: Some(Arc::clone(&dispatcher)),
    });
    let server = Arc::new(ProtocolServer::new(config.server.clone()));
    handlers::register_all(&server, &context);
    let bound = server.start().await?;
    info!(%bound, "Management interface ready");

    // Notification bridge.
    let (bridge_shutdown_tx, bridge_shutdown_rx) = watch::channel(false);
    let bridge_task = tokio::spawn(bridge::run(
        Arc::clone(&server),
        scheduler.events(),
        bridge_shutdown_rx,
    ));

    // Persistence synchronizer.
    let synchronizer = match (&store, &config.persistence) {
        (Some(store), Some(persistence)) => {
            let synchronizer =
                Synchronizer::new(Arc::clone(&registry), store.clone(), persistence.sync.clone());
            synchronizer.start();
            Some(synchronizer)
        }
        _ => None,
    };

    // The tick engine last, so everything it touches exists.
    scheduler.start();

    // Run until interrupted.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(signal_error) => warn!(%signal_error, "Signal handling failed, shutting down"),
    }

    // Orderly teardown: stop taking requests, drain the scheduler,
    // then flush persistence.
    server.stop(SERVER_STOP_BUDGET).await;
    scheduler.stop(SCHEDULER_STOP_BUDGET).await;
    dispatcher.stop(DISPATCHER_STOP_BUDGET).await;
    let _ = bridge_shutdown_tx.send(true);
    let _ = bridge_task.await;
    if let Some(synchronizer) = synchronizer {
        synchronizer.stop(SYNC_STOP_BUDGET).await;
    }
    if let Some(store) = store {
        // Final shard occupancy snapshot, best effort.
        if let Err(db_error) = store.upsert_server_status(&balancer.shards()).await {
            warn!(%db_error, "Final server status snapshot failed");
        }
        store.pool().close().await;
    }

    Ok(())
}
