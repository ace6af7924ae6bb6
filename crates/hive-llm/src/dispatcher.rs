//! The LLM dispatcher: a single coordinator draining a bounded ingress
//! queue into per-backend workers.
//!
//! The coordinator owns backend selection, so per-backend concurrency
//! caps are enforced at a single point: a slot is reserved before the
//! worker is spawned and released when it finishes, and a request for
//! which every healthy backend is saturated simply stays at the head of
//! the queue. Workers retry transport errors and 5xx responses with a
//! jittered fixed delay; 4xx responses fail immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use hive_types::{BalanceStrategy, LlmRequestId};

use crate::backend::Backend;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::request::{LlmEvent, LlmRequest, ModelInfo};

/// Pause between selection attempts while all backends are saturated.
const SATURATION_BACKOFF: Duration = Duration::from_millis(50);

/// Per-request event channel depth.
const EVENT_BUFFER: usize = 64;

/// Health probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One queued submission.
struct Submission {
    request_id: LlmRequestId,
    request: LlmRequest,
    events: mpsc::Sender<LlmEvent>,
}

/// Aggregate dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatcherStats {
    /// Requests ever submitted.
    pub total: u64,
    /// Requests that completed successfully.
    pub successful: u64,
    /// Requests that failed permanently.
    pub failed: u64,
    /// Completions per model name.
    pub model_usage: BTreeMap<String, u64>,
    /// Moving-average latency per backend id.
    pub backend_latency_ms: BTreeMap<String, f64>,
}

/// Shared dispatcher state.
struct DispatcherShared {
    config: LlmConfig,
    backends: Vec<Arc<Backend>>,
    http: reqwest::Client,
    ingress_tx: mpsc::Sender<Submission>,
    cancelled: std::sync::Mutex<BTreeSet<LlmRequestId>>,
    active: std::sync::Mutex<BTreeMap<LlmRequestId, watch::Sender<bool>>>,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    model_usage: std::sync::Mutex<BTreeMap<String, u64>>,
    catalog: std::sync::Mutex<Vec<ModelInfo>>,
    round_robin: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

/// The outcome of waiting for an eligible backend.
enum WaitOutcome {
    /// A backend with a free slot.
    Ready(Arc<Backend>),
    /// No healthy backend exists.
    NoBackend,
    /// The request was cancelled while queued.
    Cancelled,
    /// The dispatcher is stopping.
    Shutdown,
}

/// The LLM dispatcher.
pub struct LlmDispatcher {
    shared: Arc<DispatcherShared>,
    ingress_rx: std::sync::Mutex<Option<mpsc::Receiver<Submission>>>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl LlmDispatcher {
    /// Build an unstarted dispatcher.
    pub fn new(config: LlmConfig) -> Self {
        let (ingress_tx, ingress_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .unwrap_or_default();
        let backends = config
            .backends
            .iter()
            .cloned()
            .map(|backend| Arc::new(Backend::new(backend)))
            .collect();
        Self {
            shared: Arc::new(DispatcherShared {
                config,
                backends,
                http,
                ingress_tx,
                cancelled: std::sync::Mutex::new(BTreeSet::new()),
                active: std::sync::Mutex::new(BTreeMap::new()),
                total: AtomicU64::new(0),
                successful: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                model_usage: std::sync::Mutex::new(BTreeMap::new()),
                catalog: std::sync::Mutex::new(Vec::new()),
                round_robin: AtomicUsize::new(0),
                shutdown_tx,
            }),
            ingress_rx: std::sync::Mutex::new(Some(ingress_rx)),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start the coordinator and the periodic health checker.
    pub fn start(&self) {
        let receiver = self
            .ingress_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            warn!("Dispatcher started twice; ignoring");
            return;
        };
        let mut tasks = self.lock_tasks();
        tasks.push(tokio::spawn(coordinator_loop(
            Arc::clone(&self.shared),
            receiver,
        )));
        tasks.push(tokio::spawn(health_loop(Arc::clone(&self.shared))));
        info!(
            backends = self.shared.backends.len(),
            strategy = ?self.shared.config.strategy,
            "LLM dispatcher started"
        );
    }

    /// Submit a request; events arrive on the returned channel.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::QueueFull`] when the ingress queue is at
    /// capacity and [`LlmError::ShutdownInProgress`] while stopping.
    pub fn submit(
        &self,
        request: LlmRequest,
    ) -> Result<(LlmRequestId, mpsc::Receiver<LlmEvent>), LlmError> {
        if *self.shared.shutdown_tx.borrow() {
            return Err(LlmError::ShutdownInProgress);
        }
        let request_id = LlmRequestId::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let submission = Submission {
            request_id,
            request,
            events: events_tx,
        };
        match self.shared.ingress_tx.try_send(submission) {
            Ok(()) => {
                self.shared.total.fetch_add(1, Ordering::Relaxed);
                Ok((request_id, events_rx))
            }
            Err(_) => Err(LlmError::QueueFull),
        }
    }

    /// Best-effort cancel: queued requests are dropped before dispatch,
    /// dispatched requests receive a cancel signal.
    pub fn cancel(&self, request_id: LlmRequestId) {
        let signalled = {
            let active = self
                .shared
                .active
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            active.get(&request_id).map(|tx| tx.send(true))
        };
        if signalled.is_none() {
            let mut cancelled = self
                .shared
                .cancelled
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cancelled.insert(request_id);
        }
        debug!(%request_id, "Cancel requested");
    }

    /// Query every healthy backend's `/models` and merge the results
    /// into the central catalog.
    pub async fn refresh_models(&self) -> Vec<ModelInfo> {
        let mut merged = Vec::new();
        for backend in &self.shared.backends {
            if !backend.is_healthy() {
                continue;
            }
            match backend.models(&self.shared.http).await {
                Ok(models) => {
                    for name in models {
                        merged.push(ModelInfo {
                            name,
                            backend_id: backend.config.id.clone(),
                        });
                    }
                }
                Err(error) => {
                    warn!(backend = backend.config.id, %error, "Model refresh failed");
                }
            }
        }
        let mut catalog = self
            .shared
            .catalog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *catalog = merged.clone();
        merged
    }

    /// The current merged model catalog.
    pub fn catalog(&self) -> Vec<ModelInfo> {
        self.shared
            .catalog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> DispatcherStats {
        let model_usage = self
            .shared
            .model_usage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let backend_latency_ms = self
            .shared
            .backends
            .iter()
            .map(|backend| (backend.config.id.clone(), backend.average_latency_ms()))
            .collect();
        DispatcherStats {
            total: self.shared.total.load(Ordering::Relaxed),
            successful: self.shared.successful.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            model_usage,
            backend_latency_ms,
        }
    }

    /// Per-backend in-flight counts, for observability and tests.
    pub fn in_flight(&self) -> BTreeMap<String, u32> {
        self.shared
            .backends
            .iter()
            .map(|backend| (backend.config.id.clone(), backend.in_flight()))
            .collect()
    }

    /// Stop the dispatcher and wait up to `grace` for tasks to drain.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shared.shutdown_tx.send(true);
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("LLM dispatcher tasks did not drain within the shutdown budget");
        }
        info!("LLM dispatcher stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Drain the ingress queue, selecting a backend per request.
async fn coordinator_loop(shared: Arc<DispatcherShared>, mut ingress_rx: mpsc::Receiver<Submission>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        let submission = tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            maybe = ingress_rx.recv() => {
                let Some(submission) = maybe else { break };
                submission
            }
        };

        if take_cancel(&shared, submission.request_id) {
            let _ = submission
                .events
                .send(LlmEvent::Failed {
                    request_id: submission.request_id,
                    error: LlmError::Cancelled,
                })
                .await;
            continue;
        }

        match wait_for_backend(&shared, submission.request_id, &mut shutdown_rx).await {
            WaitOutcome::Ready(backend) => {
                backend.acquire();
                let (cancel_tx, cancel_rx) = watch::channel(false);
                {
                    let mut active = shared
                        .active
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    active.insert(submission.request_id, cancel_tx);
                }
                tokio::spawn(run_request(Arc::clone(&shared), backend, submission, cancel_rx));
            }
            WaitOutcome::NoBackend => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                let _ = submission
                    .events
                    .send(LlmEvent::Failed {
                        request_id: submission.request_id,
                        error: LlmError::NoBackendAvailable,
                    })
                    .await;
            }
            WaitOutcome::Cancelled => {
                let _ = submission
                    .events
                    .send(LlmEvent::Failed {
                        request_id: submission.request_id,
                        error: LlmError::Cancelled,
                    })
                    .await;
            }
            WaitOutcome::Shutdown => {
                let _ = submission
                    .events
                    .send(LlmEvent::Failed {
                        request_id: submission.request_id,
                        error: LlmError::ShutdownInProgress,
                    })
                    .await;
                break;
            }
        }
    }
    debug!("Coordinator loop exited");
}

/// Wait until some healthy backend has a free slot.
async fn wait_for_backend(
    shared: &Arc<DispatcherShared>,
    request_id: LlmRequestId,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> WaitOutcome {
    loop {
        if *shutdown_rx.borrow() {
            return WaitOutcome::Shutdown;
        }
        if take_cancel(shared, request_id) {
            return WaitOutcome::Cancelled;
        }
        if !shared.backends.iter().any(|backend| backend.is_healthy()) {
            return WaitOutcome::NoBackend;
        }
        if let Some(backend) = select_backend(shared) {
            return WaitOutcome::Ready(backend);
        }
        // Every healthy backend is saturated: the request stays queued.
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            () = tokio::time::sleep(SATURATION_BACKOFF) => {}
        }
    }
}

/// Pick a backend with a free slot under the configured strategy.
fn select_backend(shared: &Arc<DispatcherShared>) -> Option<Arc<Backend>> {
    let eligible: Vec<&Arc<Backend>> = shared
        .backends
        .iter()
        .filter(|backend| backend.can_take())
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let chosen = match shared.config.strategy {
        BalanceStrategy::RoundRobin => {
            let index = shared.round_robin.fetch_add(1, Ordering::Relaxed) % eligible.len();
            eligible.get(index).copied()
        }
        BalanceStrategy::LeastConnections => eligible
            .iter()
            .copied()
            .min_by_key(|backend| (backend.in_flight(), backend.config.id.clone())),
        BalanceStrategy::Weighted => eligible.iter().copied().min_by(|a, b| {
            let ratio = |backend: &Arc<Backend>| {
                f64::from(backend.in_flight()) / f64::from(backend.config.weight.max(1))
            };
            ratio(a)
                .partial_cmp(&ratio(b))
                .unwrap_or(core::cmp::Ordering::Equal)
                .then_with(|| a.config.id.cmp(&b.config.id))
        }),
    };
    chosen.map(Arc::clone)
}

/// Run one request to completion on its assigned backend.
async fn run_request(
    shared: Arc<DispatcherShared>,
    backend: Arc<Backend>,
    submission: Submission,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let Submission {
        request_id,
        request,
        events,
    } = submission;

    let model = if request.model.is_empty() {
        shared.config.default_model.clone()
    } else {
        request.model.clone()
    };

    let started = Instant::now();
    let max_attempts = shared.config.max_retries.saturating_add(1);
    let mut attempts = 0_u32;

    let outcome = loop {
        attempts = attempts.saturating_add(1);
        let attempt = backend.generate(&shared.http, &request, &model, request_id, &events);
        let result = tokio::select! {
            result = attempt => result,
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    break Err(LlmError::Cancelled);
                }
                continue;
            }
        };

        match result {
            Ok(outcome) => break Ok(outcome),
            Err(error) if error.is_retriable() && attempts < max_attempts => {
                let delay = jittered_delay(shared.config.retry_delay_ms);
                warn!(
                    %request_id,
                    backend = backend.config.id,
                    attempts,
                    %error,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            break Err(LlmError::Cancelled);
                        }
                    }
                }
            }
            Err(error) if error.is_retriable() => {
                warn!(%request_id, attempts, %error, "Retry budget exhausted");
                break Err(LlmError::MaxRetriesExceeded { attempts });
            }
            Err(error) => break Err(error),
        }
    };

    backend.release();
    {
        let mut active = shared
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        active.remove(&request_id);
    }

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(generation) => {
            shared.successful.fetch_add(1, Ordering::Relaxed);
            backend.record_latency(started.elapsed().as_secs_f64() * 1000.0);
            {
                let mut usage = shared
                    .model_usage
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let counter = usage.entry(model).or_insert(0);
                *counter = counter.saturating_add(1);
            }
            let _ = events
                .send(LlmEvent::Completed {
                    request_id,
                    text: generation.text,
                    tokens: generation.tokens,
                    elapsed_ms,
                })
                .await;
        }
        Err(error) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            let _ = events.send(LlmEvent::Failed { request_id, error }).await;
        }
    }
}

/// Consume a queued cancel for `request_id`, if any.
fn take_cancel(shared: &Arc<DispatcherShared>, request_id: LlmRequestId) -> bool {
    shared
        .cancelled
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .remove(&request_id)
}

/// Fixed base delay jittered upward by up to 50%, so retries are always
/// separated by at least the configured delay.
fn jittered_delay(base_ms: u64) -> Duration {
    let factor = rand::rng().random_range(1.0..1.5);
    Duration::from_millis(base_ms.max(1)).mul_f64(factor)
}

/// Probe every enabled backend on the configured interval.
async fn health_loop(shared: Arc<DispatcherShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_secs(shared.config.health_check_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for backend in &shared.backends {
                    if !backend.config.enabled {
                        continue;
                    }
                    let probe = tokio::time::timeout(PROBE_TIMEOUT, backend.probe(&shared.http));
                    match probe.await {
                        Ok(Ok(())) => backend.mark_probe_success(),
                        Ok(Err(error)) => {
                            debug!(backend = backend.config.id, %error, "Probe failed");
                            backend.mark_probe_failure();
                        }
                        Err(_) => {
                            debug!(backend = backend.config.id, "Probe timed out");
                            backend.mark_probe_failure();
                        }
                    }
                }
            }
        }
    }
    debug!("Health loop exited");
}
