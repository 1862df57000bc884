//! Decodable stream sources.
//!
//! The capture worker only sees these two traits. Decoding itself is
//! delegated: [`FfmpegSource`] drives an external `ffmpeg` process, tests
//! plug in scripted sources.

pub mod ffmpeg;

use async_trait::async_trait;

use crate::error::ViewerError;
use crate::frame::{Resolution, VideoFrame};

pub use ffmpeg::FfmpegSource;

/// Opens source locators as decodable streams.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open `locator`. An error means the stream is not available yet.
    async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>, ViewerError>;
}

/// An open, decoding stream.
#[async_trait]
pub trait VideoStream: Send {
    /// Resolution reported when the stream was opened.
    fn resolution(&self) -> Resolution;

    /// Read the next decoded frame. `Ok(None)` marks end of stream.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, ViewerError>;

    /// Release the underlying decoder.
    async fn close(&mut self);
}
