//! Terminal frame sink.
//!
//! Subscribes to the capture worker's event bus and reports what a
//! windowed viewer would show: connection status, resolution, bitrate
//! and FPS. Each frame is validated and fitted into the display area.

use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use streamview_core::{Resolution, StreamEvent, VideoFrame, ViewerError};

/// Minimum spacing between FPS log lines.
pub const FPS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Scale `source` to fit inside `bounds`, keeping its aspect ratio.
pub fn fit_within(source: Resolution, bounds: Resolution) -> Resolution {
    if source.is_empty() || bounds.is_empty() {
        return Resolution::default();
    }
    let scale = f64::min(
        bounds.width as f64 / source.width as f64,
        bounds.height as f64 / source.height as f64,
    );
    Resolution::new(
        ((source.width as f64 * scale).round() as u32).max(1),
        ((source.height as f64 * scale).round() as u32).max(1),
    )
}

// ── TerminalSink ─────────────────────────────────────────────────

/// Consumes [`StreamEvent`]s and logs them.
#[derive(Debug)]
pub struct TerminalSink {
    display: Resolution,
    connected: bool,
    frames: u64,
    dropped: u64,
    last_fps_log: Option<Instant>,
    last_target: Option<Resolution>,
}

impl TerminalSink {
    pub fn new(display: Resolution) -> Self {
        Self {
            display,
            connected: false,
            frames: 0,
            dropped: 0,
            last_fps_log: None,
            last_target: None,
        }
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Events lost because the sink fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Size the most recent frame was fitted to.
    pub fn last_target(&self) -> Option<Resolution> {
        self.last_target
    }

    /// Apply one event.
    pub fn handle(&mut self, event: &StreamEvent) {
        self.handle_at(Instant::now(), event);
    }

    pub fn handle_at(&mut self, now: Instant, event: &StreamEvent) {
        match event {
            StreamEvent::StatusChanged(connected) => {
                if *connected != self.connected {
                    let label = if *connected { "Connected" } else { "Not Connected" };
                    info!("stream status: {label}");
                }
                self.connected = *connected;
            }
            StreamEvent::ResolutionDetected(res) => info!("resolution: {res}"),
            StreamEvent::BitrateUpdated(bitrate) => info!("bitrate: {bitrate}"),
            StreamEvent::FpsUpdated(fps) => {
                let due = self
                    .last_fps_log
                    .is_none_or(|last| now.duration_since(last) >= FPS_LOG_INTERVAL);
                if due {
                    info!("fps: {fps:.2}");
                    self.last_fps_log = Some(now);
                }
            }
            StreamEvent::FrameReady(frame) => {
                if let Err(e) = self.present(frame) {
                    warn!("dropping frame: {e}");
                }
            }
        }
    }

    /// Validate a frame and fit it into the display area.
    pub fn present(&mut self, frame: &VideoFrame) -> Result<Resolution, ViewerError> {
        let source = frame.resolution();
        let expected = source.frame_len(frame.format);
        if frame.data.len() < expected {
            return Err(ViewerError::Other(format!(
                "frame buffer too small: {} < {expected}",
                frame.data.len()
            )));
        }

        let target = fit_within(source, self.display);
        if self.last_target != Some(target) {
            debug!("presenting {source} as {target}");
            self.last_target = Some(target);
        }
        self.frames += 1;
        debug!(lag_ms = frame.timestamp.elapsed().as_millis() as u64, "frame presented");
        Ok(target)
    }

    /// Drain events until `shutdown` fires or the bus closes.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<StreamEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => self.handle(&event),
                Err(RecvError::Lagged(n)) => {
                    self.dropped += n;
                    debug!("sink lagged, {n} events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(frames = self.frames, dropped = self.dropped, "frame sink stopped");
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────
