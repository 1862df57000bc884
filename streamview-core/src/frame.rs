//! Decoded frame types handed from a [`VideoStream`](crate::source::VideoStream)
//! to the capture worker and on to the frame sink.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 3 bytes per pixel: Blue, Green, Red (ffmpeg `bgr24`).
    #[default]
    Bgr24,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb24,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra32,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub const fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgra32 => "bgra",
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────

/// Stream dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of one tightly packed frame in `format`.
    pub const fn frame_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A decoded, tightly packed video frame.
///
/// `data` is reference counted so fanning a frame out to several
/// subscribers never copies the pixels.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// `width * height * bytes_per_pixel` bytes.
    pub data: Bytes,
    /// When the frame was read off the stream.
    pub timestamp: Instant,
}

impl VideoFrame {
    /// Total decoded size in bytes. This is what the bitrate window counts.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_matches_format() {
        let res = Resolution::new(640, 480);
        assert_eq!(res.frame_len(PixelFormat::Bgr24), 640 * 480 * 3);
        assert_eq!(res.frame_len(PixelFormat::Bgra32), 640 * 480 * 4);
        assert_eq!(res.to_string(), "640x480");
        assert!(Resolution::new(0, 480).is_empty());
    }

    #[test]
    fn frame_reports_its_size() {
        let frame = VideoFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra32,
            data: Bytes::from(vec![0u8; 2 * 2 * 4]),
            timestamp: Instant::now(),
        };
        assert_eq!(frame.resolution(), Resolution::new(2, 2));
        assert_eq!(frame.byte_len(), frame.resolution().frame_len(frame.format));
    }

    #[test]
    fn pixel_format_names() {
        assert_eq!(PixelFormat::Bgra32.ffmpeg_name(), "bgra");
        let parsed: PixelFormat = serde_json::from_str("\"rgb24\"").unwrap();
        assert_eq!(parsed, PixelFormat::Rgb24);
        assert_eq!(serde_json::to_string(&PixelFormat::Bgr24).unwrap(), "\"bgr24\"");
    }
}
