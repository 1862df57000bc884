//! ffmpeg-backed stream source.
//!
//! Opening a locator runs `ffprobe` for the first video stream's
//! dimensions, then spawns `ffmpeg` decoding to tightly packed raw video
//! on stdout. Each frame is exactly `width * height * bpp` bytes, so the
//! reader needs no framing beyond `read_exact`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::error::ViewerError;
use crate::frame::{PixelFormat, Resolution, VideoFrame};
use crate::source::{FrameSource, VideoStream};

/// Default deadline for the metadata probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ── FfmpegSource ─────────────────────────────────────────────────

/// Opens locators through the `ffprobe` / `ffmpeg` command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    probe_timeout: Duration,
    format: PixelFormat,
}

impl FfmpegSource {
    /// Use `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg.into(),
            ffprobe_path: ffprobe.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            format: PixelFormat::Bgr24,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Layout frames are decoded to.
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Read the first video stream's resolution.
    async fn probe(&self, locator: &str) -> Result<Resolution, ViewerError> {
        let probe = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "json",
                locator,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.probe_timeout, probe)
            .await
            .map_err(|_| ViewerError::Timeout(self.probe_timeout))?
            .map_err(|e| ViewerError::SourceUnavailable(format!("ffprobe spawn error: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ViewerError::SourceUnavailable(format!(
                "ffprobe {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_probe(&output.stdout)
    }

    fn decoder(&self, locator: &str) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args([
            "-loglevel",
            "error",
            "-i",
            locator,
            "-an",
            "-f",
            "rawvideo",
            "-pix_fmt",
            self.format.ffmpeg_name(),
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
        cmd
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>, ViewerError> {
        let resolution = self.probe(locator).await?;
        debug!("probed {locator}: {resolution}");

        let mut child = self
            .decoder(locator)
            .spawn()
            .map_err(|e| ViewerError::SourceUnavailable(format!("ffmpeg spawn error: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ViewerError::Other("ffmpeg stdout not captured".into()))?;

        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            resolution,
            format: self.format,
            frame_len: resolution.frame_len(self.format),
        }))
    }
}

// ── FfmpegStream ─────────────────────────────────────────────────

struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    resolution: Resolution,
    format: PixelFormat,
    frame_len: usize,
}

#[async_trait]
impl VideoStream for FfmpegStream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, ViewerError> {
        let mut buf = BytesMut::zeroed(self.frame_len);
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(VideoFrame {
                width: self.resolution.width,
                height: self.resolution.height,
                format: self.format,
                data: buf.freeze(),
                timestamp: Instant::now(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("ffmpeg already exited: {e}");
        }
        let _ = self.child.wait().await;
    }
}

// ── Probe parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract the resolution from `ffprobe -of json` output.
fn parse_probe(stdout: &[u8]) -> Result<Resolution, ViewerError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| ViewerError::Probe("no video stream".into()))?;
    let resolution = Resolution::new(
        stream.width.unwrap_or_default(),
        stream.height.unwrap_or_default(),
    );
    if resolution.is_empty() {
        return Err(ViewerError::InvalidResolution {
            width: resolution.width,
            height: resolution.height,
        });
    }
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json() {
        let json = br#"{"programs": [], "streams": [{"width": 1280, "height": 720}]}"#;
        assert_eq!(parse_probe(json).unwrap(), Resolution::new(1280, 720));
    }

    #[test]
    fn probe_without_streams_fails() {
        assert!(matches!(parse_probe(br#"{}"#), Err(ViewerError::Probe(_))));
        assert!(matches!(
            parse_probe(br#"{"streams": [{"width": 0, "height": 0}]}"#),
            Err(ViewerError::InvalidResolution { .. })
        ));
        assert!(matches!(
            parse_probe(b"not json"),
            Err(ViewerError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let source = FfmpegSource::with_binaries(
            "/nonexistent/streamview/ffmpeg",
            "/nonexistent/streamview/ffprobe",
        );
        let result = source.open("rtmp://127.0.0.1:1/live/stream").await;
        assert!(matches!(result, Err(ViewerError::SourceUnavailable(_))));
    }
}
