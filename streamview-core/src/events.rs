//! Typed events published by the capture worker.
//!
//! Events travel on a bounded `tokio::sync::broadcast` channel. Sending
//! never blocks the worker; a subscriber that falls behind loses the
//! oldest events (and sees `RecvError::Lagged`) instead of stalling
//! capture or growing memory without bound.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::frame::{Resolution, VideoFrame};
use crate::metrics::Bitrate;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ── StreamEvent ──────────────────────────────────────────────────

/// One observable change in the capture pipeline.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A decoded frame is ready for rendering.
    FrameReady(Arc<VideoFrame>),
    /// `true` once a session is streaming, `false` when it drops or fails to open.
    StatusChanged(bool),
    /// Recomputed moving-average frame rate.
    FpsUpdated(f64),
    /// A bitrate window closed.
    BitrateUpdated(Bitrate),
    /// Resolution of a newly opened session. Sent once per session.
    ResolutionDetected(Resolution),
}

// ── StreamStats ──────────────────────────────────────────────────

/// Latest-value snapshot of the pipeline, published on a `watch` channel
/// so a renderer can poll it without consuming every event.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Whether a session is currently streaming.
    pub connected: bool,
    /// Current moving-average FPS.
    pub fps: f64,
    /// Last closed bitrate window.
    pub bitrate: Option<Bitrate>,
    /// Resolution of the current (or last) session.
    pub resolution: Option<Resolution>,
    /// Frames delivered since the worker started.
    pub total_frames: u64,
    /// Sessions successfully opened since the worker started.
    pub sessions: u64,
    /// Open attempts since the worker started, successful or not.
    pub open_attempts: u64,
}

// ── EventBus ─────────────────────────────────────────────────────

/// Producer handle for [`StreamEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventSender {
    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    /// Register a new subscriber. It only sees events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Owner of the event channel; hands out senders and subscriptions.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: EventSender,
}

impl EventBus {
    /// A bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: EventSender { tx },
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
