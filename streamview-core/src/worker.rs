//! Capture worker: the self-healing open/read/reconnect loop.
//!
//! 1. Open the locator through a [`FrameSource`]. On failure publish
//!    `StatusChanged(false)`, wait [`RECONNECT_INTERVAL`] and retry.
//! 2. On success publish `StatusChanged(true)` and the resolution, once.
//! 3. Read frames, feeding each through the [`MetricsAggregator`] and
//!    publishing FPS, bitrate and the frame itself in that order.
//! 4. On end of stream or a read error close the stream, publish
//!    `StatusChanged(false)` and go back to 1.
//!
//! A stream that is not up yet and one that drops mid-session take the
//! same path, so nothing outside the worker ever has to ask it to
//! reconnect. Every suspension point (open, frame read, backoff) races
//! the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::events::{EventSender, StreamEvent, StreamStats};
use crate::frame::VideoFrame;
use crate::metrics::MetricsAggregator;
use crate::session::StreamSession;
use crate::source::{FrameSource, VideoStream};

/// Wait between failed open attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of inter-frame intervals in the FPS average.
pub const DEFAULT_FPS_HISTORY: usize = 120;

// ── WorkerConfig ─────────────────────────────────────────────────

/// Configuration for [`CaptureWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Source locator, e.g. `rtmp://192.168.1.20:1935/live/stream`.
    pub locator: String,
    /// FPS moving-average window, in frames.
    pub fps_history: usize,
    /// Backoff after a failed open.
    pub reconnect_interval: Duration,
}

impl WorkerConfig {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            fps_history: DEFAULT_FPS_HISTORY,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }

    pub fn with_fps_history(mut self, fps_history: usize) -> Self {
        self.fps_history = fps_history.max(1);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

enum SessionEnd {
    /// The stream ended or failed; reconnect.
    Dropped,
    /// Shutdown was requested mid-session.
    Cancelled,
}

// ── CaptureWorker ────────────────────────────────────────────────

/// Owns one [`StreamSession`] at a time and everything measured about it.
pub struct CaptureWorker<S> {
    source: S,
    config: WorkerConfig,
    events: EventSender,
    session: StreamSession,
    metrics: MetricsAggregator,
    stats: StreamStats,
    stats_tx: watch::Sender<StreamStats>,
}

impl<S: FrameSource + 'static> CaptureWorker<S> {
    pub fn new(source: S, config: WorkerConfig, events: EventSender) -> Self {
        let (stats_tx, _) = watch::channel(StreamStats::default());
        Self {
            session: StreamSession::new(config.locator.clone()),
            metrics: MetricsAggregator::new(config.fps_history),
            source,
            config,
            events,
            stats: StreamStats::default(),
            stats_tx,
        }
    }

    /// Latest-value view of the worker's statistics.
    pub fn stats_receiver(&self) -> watch::Receiver<StreamStats> {
        self.stats_tx.subscribe()
    }

    /// Run the worker on its own task and return the handle that stops it.
    pub fn spawn(mut self) -> CaptureHandle {
        let shutdown = CancellationToken::new();
        let stats = self.stats_receiver();
        let token = shutdown.clone();
        let join = tokio::spawn(async move {
            self.run(token).await;
        });
        CaptureHandle {
            shutdown,
            join,
            stats,
        }
    }

    /// Run until `shutdown` is cancelled. Transient failures never end
    /// the loop.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!("capture worker started for {}", self.config.locator);
        let mut waiting = false;

        while !shutdown.is_cancelled() {
            self.session.disconnect();
            if let Err(e) = self.session.begin_connect() {
                warn!("session: {e}");
            }
            self.stats.open_attempts += 1;
            self.publish_stats();

            let opened = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.source.open(&self.config.locator) => result,
            };

            match opened {
                Ok(stream) => {
                    waiting = false;
                    if let SessionEnd::Cancelled = self.stream(stream, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    self.session.disconnect();
                    self.events.emit(StreamEvent::StatusChanged(false));
                    if !waiting {
                        info!("waiting for stream at {}", self.config.locator);
                        waiting = true;
                    }
                    debug!("open attempt {} failed: {e}", self.stats.open_attempts);

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                    }
                }
            }
        }

        self.session.disconnect();
        self.stats.connected = false;
        self.publish_stats();
        info!("capture worker stopped");
    }

    /// Drive one open session until it ends or shutdown is requested.
    async fn stream(
        &mut self,
        mut stream: Box<dyn VideoStream>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let resolution = stream.resolution();
        if let Err(e) = self.session.begin_streaming(resolution) {
            warn!("session: {e}");
        }
        self.metrics.begin_session();

        self.stats.sessions += 1;
        self.stats.connected = true;
        self.stats.resolution = Some(resolution);
        self.stats.fps = 0.0;
        self.stats.bitrate = None;
        self.publish_stats();

        info!("stream connected: {} ({resolution})", self.config.locator);
        self.events.emit(StreamEvent::StatusChanged(true));
        self.events.emit(StreamEvent::ResolutionDetected(resolution));

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Cancelled,
                result = stream.next_frame() => result,
            };

            match next {
                Ok(Some(frame)) => self.deliver(frame),
                Ok(None) => {
                    info!("stream ended: {}", self.config.locator);
                    break SessionEnd::Dropped;
                }
                Err(e) => {
                    warn!("stream read error: {e}");
                    break SessionEnd::Dropped;
                }
            }
        };

        stream.close().await;
        if let Some(duration) = self.session.streaming_duration() {
            debug!("session lasted {duration:?}");
        }
        self.session.disconnect();
        self.stats.connected = false;
        self.publish_stats();
        self.events.emit(StreamEvent::StatusChanged(false));
        end
    }

    /// Account for one frame and publish it.
    fn deliver(&mut self, frame: VideoFrame) {
        let now = Instant::now().into_std();
        let measured = self.metrics.record_frame_at(now, frame.byte_len() as u64);

        if let Some(fps) = measured.fps {
            self.stats.fps = fps;
            self.events.emit(StreamEvent::FpsUpdated(fps));
        }
        if let Some(bitrate) = measured.bitrate {
            trace!("bitrate window closed: {bitrate}");
            self.stats.bitrate = Some(bitrate);
            self.events.emit(StreamEvent::BitrateUpdated(bitrate));
        }

        self.stats.total_frames += 1;
        self.events.emit(StreamEvent::FrameReady(Arc::new(frame)));
        self.publish_stats();
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats.clone());
    }
}

// ── CaptureHandle ────────────────────────────────────────────────

/// Handle to a spawned [`CaptureWorker`].
pub struct CaptureHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    stats: watch::Receiver<StreamStats>,
}

impl CaptureHandle {
    pub fn stats(&self) -> watch::Receiver<StreamStats> {
        self.stats.clone()
    }

    /// Whether the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the worker and wait for its loop to exit.
    ///
    /// A pending backoff or frame read is interrupted immediately.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!("capture worker task failed: {e}");
        }
    }
}
