//! Inbound connection listener.
//!
//! Accepts TCP connections and runs a [`ServerHandshake`] on each in its
//! own task. A connection that fails its handshake is closed and counted;
//! nothing it does can reach the accept loop or any other connection.
//!
//! Connections that reach [`HandshakeState::Established`] are handed to a
//! [`ChunkStreamHandoff`]. Chunk-stream framing lives behind that trait;
//! this module never reads past the handshake.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HandshakeError, ViewerError};
use crate::handshake::{EstablishedConnection, HandshakeState, ServerHandshake};

/// Default RTMP port.
pub const DEFAULT_PORT: u16 = 1935;

/// Default deadline for a whole handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept (e.g. EMFILE) before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ── ListenerConfig ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// A connection that has not finished its handshake by then is aborted.
    pub handshake_timeout: Duration,
}

impl ListenerConfig {
    pub fn new(bind_address: IpAddr, port: u16) -> Self {
        Self {
            bind_address,
            port,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
    }
}

// ── Handoff ──────────────────────────────────────────────────────

/// Receives connections that completed the handshake.
///
/// This is where a chunk-stream decoder plugs in. The implementation owns
/// the connection from here on.
#[async_trait]
pub trait ChunkStreamHandoff: Send + Sync + 'static {
    async fn established(&self, conn: EstablishedConnection);
}

/// Closes established connections. Used when no decoder is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseHandoff;

#[async_trait]
impl ChunkStreamHandoff for CloseHandoff {
    async fn established(&self, conn: EstablishedConnection) {
        info!(
            "handshake complete with {}; no chunk-stream decoder attached, closing",
            conn.peer
        );
    }
}

/// Forwards established connections over an `mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelHandoff {
    tx: mpsc::Sender<EstablishedConnection>,
}

impl ChannelHandoff {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EstablishedConnection>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ChunkStreamHandoff for ChannelHandoff {
    async fn established(&self, conn: EstablishedConnection) {
        let peer = conn.peer;
        if self.tx.send(conn).await.is_err() {
            warn!("chunk-stream receiver dropped; closing {peer}");
        }
    }
}

// ── ListenerStats ────────────────────────────────────────────────

/// Connection counters, readable while the listener runs.
#[derive(Debug, Default)]
pub struct ListenerStats {
    accepted: AtomicU64,
    established: AtomicU64,
    aborted: AtomicU64,
}

impl ListenerStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }
}

// ── HandshakeListener ────────────────────────────────────────────

pub struct HandshakeListener {
    listener: TcpListener,
    config: ListenerConfig,
    handoff: Arc<dyn ChunkStreamHandoff>,
    stats: Arc<ListenerStats>,
}

impl HandshakeListener {
    /// Bind `config.bind_address:config.port`. Established connections
    /// are closed until [`with_handoff`](Self::with_handoff) attaches a
    /// decoder.
    pub async fn bind(config: ListenerConfig) -> Result<Self, ViewerError> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        Ok(Self {
            listener,
            config,
            handoff: Arc::new(CloseHandoff),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn with_handoff(mut self, handoff: impl ChunkStreamHandoff) -> Self {
        self.handoff = Arc::new(handoff);
        self
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ViewerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Cancelling also aborts handshakes still in flight.
    pub async fn run(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("handshake listener on {addr}"),
            Err(e) => debug!("listener address unavailable: {e}"),
        }

        loop {
            let accept = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.listener.accept() => result,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    if accept_backoff(&shutdown).await {
                        continue;
                    }
                    break;
                }
            };

            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            info!("client connected: {peer}");

            tokio::spawn(handle_connection(
                stream,
                peer,
                Arc::clone(&self.handoff),
                Arc::clone(&self.stats),
                self.config.handshake_timeout,
                shutdown.child_token(),
            ));
        }

        info!("handshake listener stopped");
    }
}

/// Wait out [`ACCEPT_ERROR_BACKOFF`]. `false` if shutdown came first.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

/// Bind and run a listener in one call.
pub async fn listen(
    config: ListenerConfig,
    handoff: impl ChunkStreamHandoff,
    shutdown: CancellationToken,
) -> Result<(), ViewerError> {
    let listener = HandshakeListener::bind(config).await?.with_handoff(handoff);
    listener.run(shutdown).await;
    Ok(())
}

/// Per-connection task: handshake, then hand off or drop.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handoff: Arc<dyn ChunkStreamHandoff>,
    stats: Arc<ListenerStats>,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {peer}: {e}");
    }

    let mut handshake = ServerHandshake::new();
    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(HandshakeError::Cancelled),
        result = tokio::time::timeout(timeout, handshake.perform(&mut stream)) => {
            result.unwrap_or(Err(HandshakeError::Timeout(timeout)))
        }
    };

    match outcome {
        Ok(client_hello) => {
            debug_assert_eq!(handshake.state(), HandshakeState::Established);
            stats.established.fetch_add(1, Ordering::Relaxed);
            debug!("handshake established with {peer}");
            handoff
                .established(EstablishedConnection {
                    stream,
                    peer,
                    client_hello,
                })
                .await;
        }
        Err(e) => {
            stats.aborted.fetch_add(1, Ordering::Relaxed);
            warn!("handshake with {peer} aborted: {e}");
        }
    }
}
