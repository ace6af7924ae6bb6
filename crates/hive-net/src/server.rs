//! The protocol server: TCP accept loop, per-session reader/writer
//! tasks, a command handler table, and broadcast fan-out.
//!
//! Each accepted socket gets one reader task (decodes frames and
//! dispatches requests) and one writer task (serializes outgoing
//! frames); nothing else ever touches the socket. Notifications fan out
//! through each session's bounded outbound queue; a session that cannot
//! keep up is disconnected rather than allowed to slow producers.
//!
//! Session teardown paths: peer close, frame decode failure
//! (`bad_frame`), write failure, backpressure, idle cleanup, and server
//! shutdown. All of them funnel through the session's close signal so
//! both tasks exit and the session table stays accurate.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use hive_types::SessionId;

use crate::error::{ErrorKind, ErrorReply, NetError};
use crate::frame;
use crate::message::{MessageKind, WireMessage, now_ms};

/// Future type returned by command handlers.
pub type HandlerFuture = BoxFuture<'static, Result<serde_json::Value, ErrorReply>>;

/// A registered command handler: `data` object in, `data` object out.
pub type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ErrorReply>> + Send + 'static,
{
    Arc::new(move |data| Box::pin(f(data)))
}

/// Protocol server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Port to bind; 0 picks an ephemeral port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Maximum concurrent sessions; excess connections are dropped.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Expected client heartbeat interval; sessions idle for twice this
    /// long are cleaned up.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Per-session outbound queue depth; overflow disconnects the
    /// session with backpressure.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
    /// Seconds between idle-session cleanup sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Optional local (Unix domain) socket path to accept on alongside
    /// TCP. A stale file at the path is removed on bind.
    #[serde(default)]
    pub listen_unix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            max_clients: default_max_clients(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            session_buffer: default_session_buffer(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            listen_unix: None,
        }
    }
}

/// Bookkeeping for one connected session.
#[derive(Debug)]
struct SessionHandle {
    /// Outbound message queue feeding the writer task.
    tx: mpsc::Sender<WireMessage>,
    /// Close signal observed by both session tasks.
    close_tx: watch::Sender<bool>,
    /// Milliseconds-since-epoch of the last inbound frame.
    last_activity: Arc<AtomicI64>,
    /// Peer description (TCP address or local socket), for logs.
    peer: String,
}

/// Shared server state.
struct ServerShared {
    config: ServerConfig,
    handlers: std::sync::RwLock<BTreeMap<String, Handler>>,
    sessions: std::sync::Mutex<BTreeMap<SessionId, SessionHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

/// The protocol server.
pub struct ProtocolServer {
    shared: Arc<ServerShared>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ProtocolServer {
    /// Build an unstarted server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(ServerShared {
                config,
                handlers: std::sync::RwLock::new(BTreeMap::new()),
                sessions: std::sync::Mutex::new(BTreeMap::new()),
                shutdown_tx,
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register (or replace) the handler for a command.
    pub fn register(&self, cmd: &str, handler: Handler) {
        let mut handlers = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handlers.insert(cmd.to_owned(), handler);
    }

    /// Bind the listener and start the accept and cleanup tasks.
    ///
    /// Returns the bound address (useful with an ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the bind fails.
    pub async fn start(&self) -> Result<SocketAddr, NetError> {
        let address = format!(
            "{}:{}",
            self.shared.config.listen_host, self.shared.config.listen_port
        );
        let listener = TcpListener::bind(&address).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Protocol server listening");

        let accept = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
        let cleanup = tokio::spawn(cleanup_loop(Arc::clone(&self.shared)));
        let mut tasks = self.lock_tasks();
        tasks.push(accept);
        tasks.push(cleanup);

        #[cfg(unix)]
        if let Some(path) = self.shared.config.listen_unix.clone() {
            // A previous run may have left the socket file behind.
            let _ = std::fs::remove_file(&path);
            let unix_listener = tokio::net::UnixListener::bind(&path)?;
            info!(path, "Protocol server listening on local socket");
            tasks.push(tokio::spawn(accept_unix_loop(
                Arc::clone(&self.shared),
                unix_listener,
            )));
        }

        Ok(local_addr)
    }

    /// Fan a notification out to every connected session.
    ///
    /// Sessions whose outbound queue is full are disconnected with
    /// backpressure; sessions whose writer died are pruned.
    pub fn broadcast(&self, message: &WireMessage) {
        let mut doomed = Vec::new();
        {
            let sessions = self.lock_sessions();
            for (id, session) in sessions.iter() {
                match session.tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(session = %id, peer = session.peer, "Session lagging, disconnecting with backpressure");
                        doomed.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        doomed.push(*id);
                    }
                }
            }
        }
        for id in doomed {
            close_session(&self.shared, id);
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Stop the server: reject new work, close every session, and wait
    /// up to `grace` for the background tasks to drain.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shared.shutdown_tx.send(true);

        // Give in-flight responses a moment to flush before closing.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ids: Vec<SessionId> = self.lock_sessions().keys().copied().collect();
        for id in ids {
            close_session(&self.shared, id);
        }

        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Protocol server tasks did not drain within the shutdown budget");
        }
        info!("Protocol server stopped");
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, SessionHandle>> {
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Accept connections until shutdown.
async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let (read_half, write_half) = stream.into_split();
                        spawn_session(&shared, read_half, write_half, peer.to_string());
                    }
                    Err(error) => {
                        warn!(%error, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    debug!("Accept loop exited");
}

/// Accept local-socket connections until shutdown.
#[cfg(unix)]
async fn accept_unix_loop(shared: Arc<ServerShared>, listener: tokio::net::UnixListener) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let (read_half, write_half) = stream.into_split();
                        spawn_session(&shared, read_half, write_half, String::from("local"));
                    }
                    Err(error) => {
                        warn!(%error, "Local socket accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    debug!("Local accept loop exited");
}

/// Allocate a session and start its reader and writer tasks.
fn spawn_session<R, W>(shared: &Arc<ServerShared>, read_half: R, write_half: W, peer: String)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let session_count = shared
        .sessions
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .len();
    if session_count >= shared.config.max_clients {
        warn!(peer, session_count, "Connection refused: max_clients reached");
        return;
    }

    let id = SessionId::new();
    let (tx, rx) = mpsc::channel(shared.config.session_buffer.max(1));
    let (close_tx, _) = watch::channel(false);
    let last_activity = Arc::new(AtomicI64::new(now_ms()));

    {
        let mut sessions = shared
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.insert(
            id,
            SessionHandle {
                tx: tx.clone(),
                close_tx: close_tx.clone(),
                last_activity: Arc::clone(&last_activity),
                peer: peer.clone(),
            },
        );
    }
    info!(session = %id, peer, "Session opened");

    tokio::spawn(session_writer(
        Arc::clone(shared),
        id,
        write_half,
        rx,
        close_tx.subscribe(),
    ));
    tokio::spawn(session_reader(
        Arc::clone(shared),
        id,
        read_half,
        tx,
        close_tx.subscribe(),
        last_activity,
    ));
}

/// Serialize outgoing frames for one session.
async fn session_writer<W>(
    shared: Arc<ServerShared>,
    id: SessionId,
    mut write_half: W,
    mut rx: mpsc::Receiver<WireMessage>,
    mut close_rx: watch::Receiver<bool>,
) where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    break;
                }
            }
            maybe = rx.recv() => {
                let Some(message) = maybe else { break };
                if let Err(error) = frame::write_frame(&mut write_half, &message).await {
                    debug!(session = %id, %error, "Write failed, closing session");
                    break;
                }
            }
        }
    }
    close_session(&shared, id);
}

/// Decode inbound frames and dispatch requests for one session.
async fn session_reader<R>(
    shared: Arc<ServerShared>,
    id: SessionId,
    mut read_half: R,
    tx: mpsc::Sender<WireMessage>,
    mut close_rx: watch::Receiver<bool>,
    last_activity: Arc<AtomicI64>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    break;
                }
            }
            frame = frame::read_frame(&mut read_half) => {
                match frame {
                    Ok(Some(message)) => {
                        last_activity.store(now_ms(), Ordering::Relaxed);
                        dispatch(&shared, &tx, &mut shutdown_rx, message).await;
                    }
                    Ok(None) => {
                        debug!(session = %id, "Peer closed the connection");
                        break;
                    }
                    Err(NetError::BadFrame(reason)) => {
                        warn!(session = %id, reason, "Bad frame, terminating session");
                        break;
                    }
                    Err(error) => {
                        debug!(session = %id, %error, "Read failed, closing session");
                        break;
                    }
                }
            }
        }
    }
    close_session(&shared, id);
}

/// Route one inbound message.
async fn dispatch(
    shared: &Arc<ServerShared>,
    tx: &mpsc::Sender<WireMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
    message: WireMessage,
) {
    match message.kind {
        MessageKind::Heartbeat => {
            // Activity already recorded; echo so the peer can measure.
            let _ = tx.send(WireMessage::heartbeat()).await;
        }
        MessageKind::Request => {
            let request_id = message.request_id.clone().unwrap_or_default();
            let cmd = message.cmd.clone().unwrap_or_default();
            let response = if *shutdown_rx.borrow() {
                WireMessage::response_error(
                    &request_id,
                    &cmd,
                    ErrorKind::ShutdownInProgress,
                    None,
                )
            } else {
                run_handler(shared, &request_id, &cmd, message.data).await
            };
            let _ = tx.send(response).await;
        }
        MessageKind::Response | MessageKind::Notification => {
            debug!(kind = ?message.kind, "Ignoring unexpected inbound kind");
        }
    }
}

/// Look up and run the handler for a request.
async fn run_handler(
    shared: &Arc<ServerShared>,
    request_id: &str,
    cmd: &str,
    data: Option<serde_json::Value>,
) -> WireMessage {
    if cmd == "heartbeat" {
        return WireMessage::response_ok(request_id, cmd, None);
    }

    let handler = {
        let handlers = shared
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handlers.get(cmd).cloned()
    };

    let Some(handler) = handler else {
        return WireMessage::response_error(request_id, cmd, ErrorKind::UnknownCommand, None);
    };

    match handler(data.unwrap_or(serde_json::Value::Null)).await {
        Ok(value) => {
            let data = if value.is_null() { None } else { Some(value) };
            WireMessage::response_ok(request_id, cmd, data)
        }
        Err(reply) => WireMessage::response_error(request_id, cmd, reply.kind, reply.data),
    }
}

/// Remove a session from the table and signal both its tasks.
fn close_session(shared: &Arc<ServerShared>, id: SessionId) {
    let removed = {
        let mut sessions = shared
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.remove(&id)
    };
    if let Some(session) = removed {
        let _ = session.close_tx.send(true);
        info!(session = %id, peer = session.peer, "Session closed");
    }
}

/// Periodically drop sessions with no inbound activity.
async fn cleanup_loop(shared: Arc<ServerShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_secs(shared.config.cleanup_interval_secs.max(1));
    let idle_cutoff_ms = i64::try_from(
        shared
            .config
            .heartbeat_interval_ms
            .saturating_mul(2),
    )
    .unwrap_or(i64::MAX);

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
                let now = now_ms();
                let idle: Vec<SessionId> = {
                    let sessions = shared
                        .sessions
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    sessions
                        .iter()
                        .filter(|(_, session)| {
                            now.saturating_sub(session.last_activity.load(Ordering::Relaxed))
                                > idle_cutoff_ms
                        })
                        .map(|(id, _)| *id)
                        .collect()
                };
                for id in idle {
                    info!(session = %id, "Dropping idle session");
                    close_session(&shared, id);
                }
            }
        }
    }
    debug!("Cleanup loop exited");
}

const fn default_listen_port() -> u16 {
    8765
}

fn default_listen_host() -> String {
    String::from("127.0.0.1")
}

const fn default_max_clients() -> usize {
    256
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

const fn default_session_buffer() -> usize {
    1024
}

const fn default_cleanup_interval_secs() -> u64 {
    60
}
