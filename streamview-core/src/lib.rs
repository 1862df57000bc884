//! # streamview-core
//!
//! Ingest and reconnect pipeline for the streamview RTMP viewer.
//!
//! This crate contains:
//! - **Capture**: `CaptureWorker`, a self-healing open/read/reconnect loop
//!   that owns one `StreamSession` at a time
//! - **Metrics**: `MetricsAggregator`: moving-average FPS and windowed
//!   bitrate with kbps/Mbps promotion
//! - **Handshake**: the fixed 1536-byte RTMP handshake state machine and
//!   the `HandshakeListener` that runs it per accepted connection
//! - **Events**: `StreamEvent` published on a bounded, drop-oldest bus
//! - **Source**: `FrameSource` / `VideoStream` traits and the ffmpeg-backed
//!   `FfmpegSource`
//! - **Error**: `ViewerError`, a typed, `thiserror`-based error hierarchy

pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod listener;
pub mod metrics;
pub mod network;
pub mod session;
pub mod source;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{HandshakeError, ViewerError};
pub use events::{EventBus, EventSender, StreamEvent, StreamStats};
pub use frame::{PixelFormat, Resolution, VideoFrame};
pub use handshake::{
    EstablishedConnection, HANDSHAKE_SIZE, HandshakeState, RTMP_VERSION, ServerHandshake,
};
pub use listener::{
    ChannelHandoff, ChunkStreamHandoff, CloseHandoff, HandshakeListener, ListenerConfig,
    ListenerStats, listen,
};
pub use metrics::{
    Bitrate, BitrateAccumulator, BitrateUnit, FpsWindow, FrameMetrics, MetricsAggregator,
};
pub use network::{StreamEndpoint, local_ip};
pub use session::{SessionState, StreamSession};
pub use source::{FfmpegSource, FrameSource, VideoStream};
pub use worker::{CaptureHandle, CaptureWorker, RECONNECT_INTERVAL, WorkerConfig};
