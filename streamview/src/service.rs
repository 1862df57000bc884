//! Viewer service lifecycle.
//!
//! Starts the handshake listener, the capture worker and the terminal
//! sink from one [`ViewerConfig`], and stops them together.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use streamview_core::{
    CaptureHandle, CaptureWorker, EventBus, HandshakeListener, ListenerStats, StreamStats,
};

use crate::config::ViewerConfig;
use crate::sink::TerminalSink;

// ── ViewerService ────────────────────────────────────────────────

pub struct ViewerService {
    config: ViewerConfig,
}

impl ViewerService {
    pub fn new(config: ViewerConfig) -> Self {
        Self { config }
    }

    /// Start every component and return a handle to them.
    ///
    /// A listener that cannot bind is logged and skipped: the capture
    /// path does not depend on it.
    pub async fn start(&self) -> RunningViewer {
        let shutdown = CancellationToken::new();

        let (listener_addr, listener_stats, listener_task) =
            match HandshakeListener::bind(self.config.listener_config()).await {
                Ok(listener) => {
                    let addr = listener.local_addr().ok();
                    let stats = listener.stats();
                    let task = tokio::spawn(listener.run(shutdown.child_token()));
                    (addr, Some(stats), Some(task))
                }
                Err(e) => {
                    error!("handshake listener unavailable: {e}");
                    (None, None, None)
                }
            };

        // advertise the port actually bound (differs when configured as 0)
        let mut config = self.config.clone();
        if let Some(addr) = listener_addr {
            config.network.port = addr.port();
        }

        let host = config.display_host();
        let stream_url = config.endpoint(&host).locator();
        let locator = config.source_locator(&host);

        info!("local IP: {host}");
        if let Some(addr) = listener_addr {
            info!("RTMP handshake listener bound to {addr}");
        }
        info!("stream URL: {stream_url}");
        if locator != stream_url {
            info!("capturing from {locator}");
        }

        let bus = EventBus::new(config.capture.event_capacity);
        let sink = TerminalSink::new(config.display_size());
        let sink_task = tokio::spawn(sink.run(bus.subscribe(), shutdown.child_token()));

        let worker = CaptureWorker::new(
            config.ffmpeg_source(),
            config.worker_config(locator),
            bus.sender(),
        )
        .spawn();

        RunningViewer {
            shutdown,
            stream_url,
            listener_addr,
            listener_stats,
            listener_task,
            sink_task,
            worker,
        }
    }

    /// Run until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken) {
        let running = self.start().await;
        stop.cancelled().await;
        running.stop().await;
    }
}

// ── RunningViewer ────────────────────────────────────────────────

/// Handle to a started [`ViewerService`].
pub struct RunningViewer {
    shutdown: CancellationToken,
    stream_url: String,
    listener_addr: Option<SocketAddr>,
    listener_stats: Option<Arc<ListenerStats>>,
    listener_task: Option<JoinHandle<()>>,
    sink_task: JoinHandle<TerminalSink>,
    worker: CaptureHandle,
}

impl RunningViewer {
    /// The `rtmp://` URL streaming software should push to.
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Address the handshake listener is bound to, if it bound.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener_addr
    }

    pub fn listener_stats(&self) -> Option<Arc<ListenerStats>> {
        self.listener_stats.clone()
    }

    pub fn stream_stats(&self) -> watch::Receiver<StreamStats> {
        self.worker.stats()
    }

    /// Stop the worker first, then the listener and the sink.
    pub async fn stop(self) {
        self.worker.stop().await;
        self.shutdown.cancel();
        if let Some(task) = self.listener_task {
            if let Err(e) = task.await {
                error!("listener task failed: {e}");
            }
        }
        match self.sink_task.await {
            Ok(sink) => info!(frames = sink.frames(), "viewer stopped"),
            Err(e) => error!("sink task failed: {e}"),
        }
    }
}
