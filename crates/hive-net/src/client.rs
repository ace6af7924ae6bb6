//! The protocol client: connection state machine, offline outbox,
//! pending-request tracking, and heartbeats.
//!
//! State transitions:
//!
//! ```text
//! disconnected -> connecting -> connected -> reconnecting -> ...
//!                                     \-> disconnected (user stop or
//!                                         attempts exhausted)
//! ```
//!
//! While not connected, [`ProtocolClient::send_request`] parks messages
//! in a bounded outbox; on (re)connect the outbox drains oldest-first at
//! a limited rate so a reconnect burst cannot flood the server. Every
//! request gets a pending-table entry that is removed by exactly one of:
//! a matching response, retry-budget exhaustion, or cancel.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, NetError};
use crate::frame;
use crate::message::{MessageKind, WireMessage};

/// Maximum retries for one pending request.
const MAX_REQUEST_RETRIES: u32 = 3;

/// Outbox drain rate: at most this many messages per drain pulse.
const DRAIN_BATCH: usize = 10;

/// Outbox drain pulse period.
const DRAIN_PERIOD: Duration = Duration::from_millis(100);

/// Protocol client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Delay between reconnect attempts.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Age at which a pending request is retried or failed.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Interval between client heartbeats while connected.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Interval between pending-table scans.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Bounded offline outbox depth.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl ClientConfig {
    /// A config pointing at `server_addr` with default timings.
    pub fn new(server_addr: &str) -> Self {
        Self {
            server_addr: server_addr.to_owned(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and exchanging frames.
    Connected,
    /// Connection lost; retrying.
    Reconnecting,
}

/// One tracked outstanding request.
#[derive(Debug)]
struct PendingRequest {
    message: WireMessage,
    first_sent: Instant,
    retries: u32,
    responder: Option<oneshot::Sender<WireMessage>>,
}

/// Exponential moving average of response latency.
#[derive(Debug, Default)]
struct LatencyEma {
    average_ms: f64,
    samples: u64,
}

impl LatencyEma {
    fn record(&mut self, sample_ms: f64) {
        self.samples = self.samples.saturating_add(1);
        if self.samples == 1 {
            self.average_ms = sample_ms;
        } else {
            self.average_ms = self.average_ms.mul_add(0.8, sample_ms * 0.2);
        }
    }
}

/// Shared client state.
struct ClientShared {
    config: ClientConfig,
    state: std::sync::Mutex<ClientState>,
    outbox: std::sync::Mutex<VecDeque<WireMessage>>,
    pending: std::sync::Mutex<BTreeMap<String, PendingRequest>>,
    conn_tx: std::sync::Mutex<Option<mpsc::Sender<WireMessage>>>,
    next_id: AtomicU64,
    latency: std::sync::Mutex<LatencyEma>,
    shutdown_tx: watch::Sender<bool>,
    notify_tx: broadcast::Sender<WireMessage>,
}

impl ClientShared {
    fn set_state(&self, state: ClientState) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *guard != state {
            debug!(?state, "Client state changed");
            *guard = state;
        }
    }

    fn conn(&self) -> Option<mpsc::Sender<WireMessage>> {
        self.conn_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Hand a message to the live connection or park it in the outbox.
    fn deliver(&self, message: WireMessage) -> Result<(), NetError> {
        match self.conn() {
            Some(conn) => match conn.try_send(message) {
                Ok(()) => Ok(()),
                Err(
                    mpsc::error::TrySendError::Full(message)
                    | mpsc::error::TrySendError::Closed(message),
                ) => self.park(message),
            },
            None => self.park(message),
        }
    }

    /// Park a message in the bounded outbox.
    fn park(&self, message: WireMessage) -> Result<(), NetError> {
        let mut outbox = self
            .outbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if outbox.len() >= self.config.outbox_capacity {
            return Err(NetError::QueueFull);
        }
        outbox.push_back(message);
        Ok(())
    }
}

/// The protocol client.
pub struct ProtocolClient {
    shared: Arc<ClientShared>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ProtocolClient {
    /// Build an unconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(ClientShared {
                config,
                state: std::sync::Mutex::new(ClientState::Disconnected),
                outbox: std::sync::Mutex::new(VecDeque::new()),
                pending: std::sync::Mutex::new(BTreeMap::new()),
                conn_tx: std::sync::Mutex::new(None),
                next_id: AtomicU64::new(0),
                latency: std::sync::Mutex::new(LatencyEma::default()),
                shutdown_tx,
                notify_tx,
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start the connection supervisor, pending-table scanner, and
    /// heartbeat tasks.
    pub fn connect(&self) {
        self.shared.set_state(ClientState::Connecting);
        let mut tasks = self.lock_tasks();
        tasks.push(tokio::spawn(supervisor_loop(Arc::clone(&self.shared))));
        tasks.push(tokio::spawn(scan_loop(Arc::clone(&self.shared))));
        tasks.push(tokio::spawn(heartbeat_loop(Arc::clone(&self.shared))));
    }

    /// Send a request; the returned receiver resolves with the matching
    /// response, a synthesized `request_timeout` error response after
    /// the retry budget is spent, or closes on cancel.
    ///
    /// While not connected the request is parked in the outbox and its
    /// timeout clock starts immediately.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::QueueFull`] when the outbox is at capacity.
    pub fn send_request(
        &self,
        cmd: &str,
        data: Option<serde_json::Value>,
    ) -> Result<oneshot::Receiver<WireMessage>, NetError> {
        let sequence = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let request_id = format!("req-{}", sequence.saturating_add(1));
        let message = WireMessage::request(&request_id, cmd, data);
        let (responder, receiver) = oneshot::channel();

        {
            let mut pending = self.lock_pending();
            pending.insert(
                request_id.clone(),
                PendingRequest {
                    message: message.clone(),
                    first_sent: Instant::now(),
                    retries: 0,
                    responder: Some(responder),
                },
            );
        }

        if let Err(error) = self.shared.deliver(message) {
            self.lock_pending().remove(&request_id);
            return Err(error);
        }
        Ok(receiver)
    }

    /// Cancel a pending request; its receiver closes without a value.
    pub fn cancel(&self, request_id: &str) {
        if self.lock_pending().remove(request_id).is_some() {
            debug!(request_id, "Pending request cancelled");
        }
    }

    /// Subscribe to server notifications.
    pub fn notifications(&self) -> broadcast::Receiver<WireMessage> {
        self.shared.notify_tx.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Exponential moving average of request round-trip latency.
    pub fn average_latency_ms(&self) -> f64 {
        self.shared
            .latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .average_ms
    }

    /// Number of tracked outstanding requests.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Number of messages parked for later delivery.
    pub fn outbox_len(&self) -> usize {
        self.shared
            .outbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Disconnect and stop all client tasks.
    pub async fn disconnect(&self) {
        eprintln!("DBG disconnect: sending shutdown");
        let _ = self.shared.shutdown_tx.send(true);
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        eprintln!("DBG disconnect: awaiting {} tasks", tasks.len());
        for (i, task) in tasks.into_iter().enumerate() {
            eprintln!("DBG disconnect: awaiting task {i}");
            let _ = task.await;
            eprintln!("DBG disconnect: task {i} done");
        }
        self.shared.set_state(ClientState::Disconnected);
        info!("Client disconnected");
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PendingRequest>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Connect, run the session, reconnect on loss.
async fn supervisor_loop(shared: Arc<ClientShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let reconnect_interval = Duration::from_millis(shared.config.reconnect_interval_ms.max(10));
    let mut attempts = 0_u32;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match TcpStream::connect(&shared.config.server_addr).await {
            Ok(stream) => {
                attempts = 0;
                shared.set_state(ClientState::Connected);
                info!(addr = shared.config.server_addr, "Connected");
                run_session(&shared, stream, &mut shutdown_rx).await;
                {
                    let mut conn = shared
                        .conn_tx
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    *conn = None;
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                shared.set_state(ClientState::Reconnecting);
            }
            Err(error) => {
                attempts = attempts.saturating_add(1);
                debug!(%error, attempts, "Connect attempt failed");
                if attempts >= shared.config.max_reconnect_attempts {
                    warn!(attempts, "Reconnect attempts exhausted");
                    shared.set_state(ClientState::Disconnected);
                    break;
                }
                shared.set_state(ClientState::Reconnecting);
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(reconnect_interval) => {}
        }
    }
    debug!("Supervisor loop exited");
}

/// Run one connected session until the socket drops or shutdown.
async fn run_session(
    shared: &Arc<ClientShared>,
    stream: TcpStream,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<WireMessage>(256);
    {
        let mut conn = shared
            .conn_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *conn = Some(tx);
    }

    // Writer: drains the connection channel onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(error) = frame::write_frame(&mut write_half, &message).await {
                debug!(%error, "Client write failed");
                break;
            }
        }
    });

    // Outbox drain: oldest first, rate-limited.
    let drainer = tokio::spawn(drain_outbox(Arc::clone(shared)));

    // Reader: inline until the connection ends.
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = frame::read_frame(&mut read_half) => {
                match frame {
                    Ok(Some(message)) => handle_inbound(shared, message),
                    Ok(None) => {
                        debug!("Server closed the connection");
                        break;
                    }
                    Err(error) => {
                        debug!(%error, "Client read failed");
                        break;
                    }
                }
            }
        }
    }

    drainer.abort();
    writer.abort();
}

/// Drain parked messages onto the live connection, oldest first, at a
/// bounded rate.
async fn drain_outbox(shared: Arc<ClientShared>) {
    loop {
        let Some(conn) = shared.conn() else { break };

        let batch: Vec<WireMessage> = {
            let mut outbox = shared
                .outbox
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let take = outbox.len().min(DRAIN_BATCH);
            outbox.drain(..take).collect()
        };

        if batch.is_empty() {
            // Stay alive to pick up anything parked while connected.
            tokio::time::sleep(DRAIN_PERIOD).await;
            continue;
        }
        let drained = batch.len();
        for message in batch {
            if conn.send(message).await.is_err() {
                return;
            }
        }
        debug!(drained, "Outbox batch delivered");
        tokio::time::sleep(DRAIN_PERIOD).await;
    }
}

/// Handle one inbound message.
fn handle_inbound(shared: &Arc<ClientShared>, message: WireMessage) {
    match message.kind {
        MessageKind::Response => {
            let Some(request_id) = message.request_id.clone() else {
                return;
            };
            let removed = {
                let mut pending = shared
                    .pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                pending.remove(&request_id)
            };
            if let Some(mut entry) = removed {
                let elapsed_ms = entry.first_sent.elapsed().as_secs_f64() * 1000.0;
                {
                    let mut latency = shared
                        .latency
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    latency.record(elapsed_ms);
                }
                if let Some(responder) = entry.responder.take() {
                    let _ = responder.send(message);
                }
            } else {
                debug!(request_id, "Response for unknown request (late retry?)");
            }
        }
        MessageKind::Notification => {
            let _ = shared.notify_tx.send(message);
        }
        MessageKind::Heartbeat | MessageKind::Request => {}
    }
}

/// Periodic pending-table scan: retry young entries, fail old ones.
async fn scan_loop(shared: Arc<ClientShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_millis(shared.config.scan_interval_ms.max(10));
    let timeout = Duration::from_millis(shared.config.request_timeout_ms.max(1));
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
                let mut resend = Vec::new();
                {
                    let mut pending = shared
                        .pending
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    let expired: Vec<String> = pending
                        .iter()
                        .filter(|(_, entry)| entry.first_sent.elapsed() >= timeout)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in expired {
                        let retryable = pending
                            .get(&id)
                            .is_some_and(|entry| entry.retries < MAX_REQUEST_RETRIES);
                        if retryable {
                            if let Some(entry) = pending.get_mut(&id) {
                                entry.retries = entry.retries.saturating_add(1);
                                entry.first_sent = Instant::now();
                                resend.push(entry.message.clone());
                                debug!(request_id = id, retries = entry.retries, "Retrying request");
                            }
                        } else if let Some(mut entry) = pending.remove(&id) {
                            warn!(request_id = id, "Request failed after retry budget");
                            if let Some(responder) = entry.responder.take() {
                                let cmd = entry.message.cmd.as_deref().unwrap_or_default();
                                let _ = responder.send(WireMessage::response_error(
                                    &id,
                                    cmd,
                                    ErrorKind::RequestTimeout,
                                    None,
                                ));
                            }
                        }
                    }
                }
                for message in resend {
                    let _ = shared.deliver(message);
                }
            }
        }
    }
    debug!("Scan loop exited");
}

/// Send a heartbeat every interval while connected.
async fn heartbeat_loop(shared: Arc<ClientShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_millis(shared.config.heartbeat_interval_ms.max(10));
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
                if let Some(conn) = shared.conn() {
                    let _ = conn.try_send(WireMessage::heartbeat());
                }
            }
        }
    }
    debug!("Heartbeat loop exited");
}

const fn default_reconnect_interval_ms() -> u64 {
    5_000
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_max_reconnect_attempts() -> u32 {
    10
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

const fn default_scan_interval_ms() -> u64 {
    5_000
}

const fn default_outbox_capacity() -> usize {
    10_000
}
