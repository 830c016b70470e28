//! Daemon Server Implementation
//!
//! The accept loop for the arbiter daemon:
//! - Accepts connections on a Unix socket
//! - Gives every connection its own arbitration session
//! - Tracks active connections for limits and shutdown
//! - Prunes sessions whose task has ended
//!
//! # Connection Model
//!
//! One connection is one user's glasses feed. Clients speak newline-delimited
//! JSON ([`ClientMessage`] in, [`ServerMessage`] and display frames out).
//!
//! ```text
//!                      DaemonServer
//!                           │
//!           ┌───────────────┼───────────────┐
//!           │               │               │
//!        conn-1          conn-2          conn-3
//!           │               │               │
//!      session(alice)  session(bob)   session(anon)
//!           └───────────────┴───────────────┘
//!                           │
//!                    SessionRegistry
//! ```
//!
//! Frames the engine emits and replies to client requests share one outbound
//! channel per connection, drained by a dedicated writer task, so the order a
//! client observes is the order the session produced them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn, Instrument};

use arbiter_core::{
    ChannelSender, ClientMessage, DisplayOutcome, ServerMessage, SessionHandle, SessionRegistry,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier for one accepted socket connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state tracking (internal to the server)
struct ConnectionState {
    /// When the connection was established
    connected_at: std::time::Instant,
    /// Remote peer UID (from `SO_PEERCRED`)
    peer_uid: Option<u32>,
    /// Handle to abort the connection task
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the daemon server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Outbound lines buffered per connection before frames report backpressure
    pub outbound_capacity: usize,
    /// How often ended sessions are pruned from the registry
    pub prune_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            outbound_capacity: 256,
            prune_interval: Duration::from_secs(30),
        }
    }
}

/// The main daemon server
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Server configuration
    server_config: ServerConfig,
    /// Sessions, one per connection
    registry: Arc<SessionRegistry>,
    /// Active connection state (task handles, peer info)
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a new daemon server
    #[must_use]
    pub fn new(socket_path: PathBuf, registry: SessionRegistry) -> Self {
        Self {
            socket_path,
            server_config: ServerConfig::default(),
            registry: Arc::new(registry),
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Path of the listening socket
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Session registry backing the connections
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Get peer credentials from Unix socket
    #[cfg(target_os = "linux")]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = libc::socklen_t::try_from(std::mem::size_of::<libc::ucred>()).ok()?;

        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if result == 0 {
            Some(cred.uid)
        } else {
            None
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn get_peer_uid(_stream: &UnixStream) -> Option<u32> {
        None
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Prepare the socket path and bind the listener
    ///
    /// # Errors
    ///
    /// Fails if the socket directory cannot be created, a stale socket cannot
    /// be removed, or the bind itself fails.
    pub fn bind(&self) -> Result<UnixListener> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        // Owner-only
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.socket_path, perms).with_context(|| {
                format!("Failed to set socket permissions: {:?}", self.socket_path)
            })?;
        }

        info!(path = ?self.socket_path, "Listening for connections");
        Ok(listener)
    }

    /// Bind and serve until `shutdown` is notified
    ///
    /// # Errors
    ///
    /// Fails if binding fails or the socket cannot be removed on shutdown.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until `shutdown` is notified
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be removed on shutdown.
    pub async fn serve(&self, listener: UnixListener, shutdown: Arc<Notify>) -> Result<()> {
        let mut prune = tokio::time::interval(self.server_config.prune_interval);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                _ = prune.tick() => {
                    let pruned = self.registry.prune_closed();
                    if pruned > 0 {
                        debug!(
                            pruned,
                            active_connections = self.connection_count(),
                            "Pruned ended sessions"
                        );
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.accept(stream),
                    Err(e) => error!(error = %e, "Accept failed"),
                },
            }
        }

        self.shutdown().await
    }

    fn accept(&self, stream: UnixStream) {
        if self.connection_states.len() >= self.server_config.max_connections {
            warn!("Connection limit reached, rejecting new connection");
            return;
        }

        let peer_uid = Self::get_peer_uid(&stream);

        // Same UID as the daemon, or root
        let our_uid = unsafe { libc::getuid() };
        if let Some(uid) = peer_uid {
            if uid != our_uid && uid != 0 {
                warn!(
                    peer_uid = uid,
                    our_uid = our_uid,
                    "Rejecting connection from different user"
                );
                return;
            }
        }

        let conn_id = ConnectionId::new();
        info!(
            conn_id = %conn_id,
            peer_uid = ?peer_uid,
            active_connections = self.connection_states.len() + 1,
            "New connection accepted"
        );

        let connection = Connection {
            id: conn_id,
            registry: Arc::clone(&self.registry),
            capacity: self.server_config.outbound_capacity,
            session: None,
        };
        let connection_states = Arc::clone(&self.connection_states);

        let task_handle = tokio::spawn(
            async move {
                connection.run(stream).await;
                connection_states.remove(&conn_id);
                info!(
                    active_connections = connection_states.len(),
                    "Connection handler finished"
                );
            }
            .instrument(tracing::info_span!("connection", %conn_id)),
        );

        self.connection_states.insert(
            conn_id,
            ConnectionState {
                connected_at: std::time::Instant::now(),
                peer_uid,
                abort_handle: task_handle.abort_handle(),
            },
        );
    }

    /// Graceful shutdown
    async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");

        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, conn_state)) = self.connection_states.remove(&conn_id) {
                info!(
                    conn_id = %conn_id,
                    peer_uid = ?conn_state.peer_uid,
                    uptime_secs = conn_state.connected_at.elapsed().as_secs(),
                    "Aborting connection"
                );
                conn_state.abort_handle.abort();
            }
        }

        self.registry.shutdown_all().await;

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Get number of active connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }
}

// =============================================================================
// Per-Connection Handling
// =============================================================================

/// What the read loop does after a line
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

struct Connection {
    id: ConnectionId,
    registry: Arc<SessionRegistry>,
    capacity: usize,
    session: Option<SessionHandle>,
}

impl Connection {
    async fn run(mut self, stream: UnixStream) {
        info!("Connection handler started");

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<String>(self.capacity);
        let writer = tokio::spawn(write_lines(write_half, out_rx).in_current_span());

        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if self.handle_line(&line, &out_tx).await == Flow::Close {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Client disconnected (EOF)");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Read error");
                    break;
                }
            }
        }

        if let Some(session) = self.session.take() {
            self.registry.remove(session.id()).await;
        }
        drop(out_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
    }

    async fn handle_line(&mut self, line: &str, out: &mpsc::Sender<String>) -> Flow {
        let message = match serde_json::from_str::<ClientMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed client message");
                return reject(out, &ProtocolError::Malformed(e)).await;
            }
        };
        debug!(message = ?message, "Received message");

        let result = match message {
            ClientMessage::Hello { user_id } => {
                if self.session.is_some() {
                    return reject(out, &ProtocolError::LateHello).await;
                }
                self.session(Some(user_id), out);
                return Flow::Continue;
            }
            ClientMessage::AppStart { package_name } => {
                self.session(None, out).app_started(package_name).await
            }
            ClientMessage::AppStop { package_name } => {
                self.session(None, out).app_stopped(package_name).await
            }
            ClientMessage::DisplayEvent(request) => {
                let package_name = request.requesting_app.clone();
                let outcome = self
                    .session(None, out)
                    .display_outcome(request)
                    .await
                    .unwrap_or(DisplayOutcome::DeliveryFailed);
                return reply(
                    out,
                    &ServerMessage::DisplayResult {
                        package_name,
                        accepted: outcome.is_shown(),
                        outcome,
                    },
                )
                .await;
            }
            ClientMessage::Disconnect => {
                info!("Client requested disconnect");
                return Flow::Close;
            }
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(error = %e, "Session unavailable");
                Flow::Close
            }
        }
    }

    /// The connection's session, created on first use
    fn session(&mut self, user_id: Option<String>, out: &mpsc::Sender<String>) -> &SessionHandle {
        let id = self.id;
        let registry = &self.registry;
        self.session.get_or_insert_with(|| {
            let user_id = user_id.unwrap_or_else(|| format!("anonymous-{id}"));
            let session = registry.create(user_id, ChannelSender::new(out.clone()));
            info!(session = %session.id(), user = session.user_id(), "Session attached");
            session
        })
    }
}

/// Client protocol violations, answered with an `error` message
#[derive(Debug, Error)]
enum ProtocolError {
    /// The line is not a valid client message
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),
    /// `hello` arrived after the session was already attached
    #[error("hello must be the first message")]
    LateHello,
}

async fn reject(out: &mpsc::Sender<String>, error: &ProtocolError) -> Flow {
    reply(
        out,
        &ServerMessage::Error {
            message: error.to_string(),
        },
    )
    .await
}

async fn reply(out: &mpsc::Sender<String>, message: &ServerMessage) -> Flow {
    let line = match serde_json::to_string(message) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Failed to encode reply");
            return Flow::Continue;
        }
    };
    if out.send(line).await.is_err() {
        debug!("Writer gone, closing connection");
        return Flow::Close;
    }
    Flow::Continue
}

async fn write_lines(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!(error = %e, "Write error");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
