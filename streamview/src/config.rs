//! Configuration for the viewer.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use streamview_core::{
    FfmpegSource, ListenerConfig, PixelFormat, Resolution, StreamEndpoint, WorkerConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Listener and stream address settings.
    pub network: NetworkConfig,
    /// Capture pipeline settings.
    pub capture: CaptureConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the handshake listener binds to.
    pub bind_address: String,
    /// RTMP port, for both the listener and the constructed stream URL.
    pub port: u16,
    /// Stream path appended to the constructed URL.
    pub stream_path: String,
    /// Full stream URL. Overrides the constructed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// Host shown in the stream URL. Auto-detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_ip: Option<String>,
    /// Deadline for a client to finish the handshake.
    pub handshake_timeout_ms: u64,
}

/// Capture pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames in the FPS moving average.
    pub fps_history_length: usize,
    /// ffmpeg executable.
    pub ffmpeg_path: String,
    /// ffprobe executable.
    pub ffprobe_path: String,
    /// Deadline for probing a stream before an open counts as failed.
    pub probe_timeout_ms: u64,
    /// Events buffered for a slow frame sink before the oldest are dropped.
    pub event_capacity: usize,
    /// Decoded pixel layout: "bgr24", "rgb24" or "bgra32".
    pub pixel_format: PixelFormat,
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Window size as `WIDTHxHEIGHT`.
    pub window_size: String,
    /// Video area size as `WIDTHxHEIGHT`.
    pub display_size: String,
    /// Start fullscreen.
    pub fullscreen: bool,
    /// Use the dark palette.
    pub dark_theme: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

pub const DEFAULT_WINDOW_SIZE: Resolution = Resolution::new(800, 600);
pub const DEFAULT_DISPLAY_SIZE: Resolution = Resolution::new(640, 480);

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: streamview_core::listener::DEFAULT_PORT,
            stream_path: "/live/stream".into(),
            stream_url: None,
            local_ip: None,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps_history_length: streamview_core::worker::DEFAULT_FPS_HISTORY,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            probe_timeout_ms: 5_000,
            event_capacity: streamview_core::events::DEFAULT_EVENT_CAPACITY,
            pixel_format: PixelFormat::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE.to_string(),
            display_size: DEFAULT_DISPLAY_SIZE.to_string(),
            fullscreen: false,
            dark_theme: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// How [`ViewerConfig::load_with_status`] obtained its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Parsed from the file.
    Loaded,
    /// No readable file; defaults used.
    Missing,
    /// The file did not parse; defaults used.
    Invalid(String),
}

impl LoadStatus {
    /// Whether defaults replaced the file's contents.
    pub fn fell_back(&self) -> bool {
        !matches!(self, Self::Loaded)
    }

    /// Report the outcome. Call once logging is initialised.
    pub fn log(&self, path: &Path) {
        match self {
            Self::Loaded => debug!("loaded config from {}", path.display()),
            Self::Missing => info!("no config at {}; using defaults", path.display()),
            Self::Invalid(reason) => {
                warn!("invalid config {}: {reason}; using defaults", path.display())
            }
        }
    }
}

impl ViewerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let (config, status) = Self::load_with_status(path);
        status.log(path);
        config
    }

    /// Like [`load`](Self::load), but returns the outcome instead of
    /// logging it, for callers that load before tracing is set up.
    pub fn load_with_status(path: &Path) -> (Self, LoadStatus) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, LoadStatus::Loaded),
                Err(e) => (Self::default(), LoadStatus::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), LoadStatus::Missing),
        }
    }

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Host shown in the stream URL.
    pub fn display_host(&self) -> String {
        match &self.network.local_ip {
            Some(ip) if !ip.trim().is_empty() => ip.trim().to_string(),
            _ => streamview_core::local_ip().to_string(),
        }
    }

    /// The `rtmp://host:port/path` URL streaming software should push to.
    pub fn endpoint(&self, host: &str) -> StreamEndpoint {
        StreamEndpoint::new(host, self.network.port, self.network.stream_path.as_str())
    }

    /// The locator the capture worker opens: `stream_url` if set,
    /// otherwise the constructed endpoint.
    pub fn source_locator(&self, host: &str) -> String {
        match &self.network.stream_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.endpoint(host).locator(),
        }
    }

    pub fn listener_config(&self) -> ListenerConfig {
        let bind = self
            .network
            .bind_address
            .parse::<IpAddr>()
            .unwrap_or_else(|e| {
                warn!(
                    "invalid bind address {:?}: {e}; using 0.0.0.0",
                    self.network.bind_address
                );
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            });
        ListenerConfig::new(bind, self.network.port)
            .with_handshake_timeout(Duration::from_millis(self.network.handshake_timeout_ms))
    }

    pub fn worker_config(&self, locator: impl Into<String>) -> WorkerConfig {
        WorkerConfig::new(locator).with_fps_history(self.capture.fps_history_length)
    }

    pub fn ffmpeg_source(&self) -> FfmpegSource {
        FfmpegSource::with_binaries(&self.capture.ffmpeg_path, &self.capture.ffprobe_path)
            .with_probe_timeout(Duration::from_millis(self.capture.probe_timeout_ms))
            .with_pixel_format(self.capture.pixel_format)
    }

    pub fn window_size(&self) -> Resolution {
        size_or_default("window size", &self.display.window_size, DEFAULT_WINDOW_SIZE)
    }

    pub fn display_size(&self) -> Resolution {
        size_or_default("display size", &self.display.display_size, DEFAULT_DISPLAY_SIZE)
    }
}

// ── Size strings ─────────────────────────────────────────────────

/// Parse `WIDTHxHEIGHT` (case-insensitive `x`). Zero dimensions are rejected.
pub fn parse_size(text: &str) -> Option<Resolution> {
    let lower = text.trim().to_ascii_lowercase();
    let (w, h) = lower.split_once('x')?;
    let size = Resolution::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
    (!size.is_empty()).then_some(size)
}

fn size_or_default(what: &str, text: &str, default: Resolution) -> Resolution {
    parse_size(text).unwrap_or_else(|| {
        warn!("invalid {what} {text:?}; using default {default}");
        default
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ViewerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("port = 1935"));
        assert!(text.contains("fps_history_length = 120"));
        assert!(!text.contains("stream_url"));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = ViewerConfig::default();
        cfg.network.stream_url = Some("rtmp://cam.local/live/a".into());
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ViewerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 1935);
        assert_eq!(parsed.network.stream_path, "/live/stream");
        assert_eq!(
            parsed.network.stream_url.as_deref(),
            Some("rtmp://cam.local/live/a")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: ViewerConfig = toml::from_str("[network]\nport = 1936\n").unwrap();
        assert_eq!(parsed.network.port, 1936);
        assert_eq!(parsed.network.bind_address, "0.0.0.0");
        assert_eq!(parsed.capture.fps_history_length, 120);
    }

    #[test]
    fn constructs_locator_from_host() {
        let cfg = ViewerConfig::default();
        assert_eq!(
            cfg.source_locator("192.168.0.7"),
            "rtmp://192.168.0.7:1935/live/stream"
        );
    }

    #[test]
    fn explicit_stream_url_wins() {
        let mut cfg = ViewerConfig::default();
        cfg.network.stream_url = Some("rtmp://elsewhere:1940/app/key".into());
        assert_eq!(cfg.source_locator("10.0.0.1"), "rtmp://elsewhere:1940/app/key");
    }

    #[test]
    fn explicit_local_ip_is_used() {
        let mut cfg = ViewerConfig::default();
        cfg.network.local_ip = Some("10.1.2.3".into());
        assert_eq!(cfg.display_host(), "10.1.2.3");
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720"), Some(Resolution::new(1280, 720)));
        assert_eq!(parse_size(" 640X480 "), Some(Resolution::new(640, 480)));
        assert_eq!(parse_size("640*480"), None);
        assert_eq!(parse_size("0x480"), None);
        assert_eq!(parse_size("widexhigh"), None);
    }

    #[test]
    fn malformed_sizes_fall_back() {
        let mut cfg = ViewerConfig::default();
        cfg.display.window_size = "huge".into();
        cfg.display.display_size = "1024x".into();
        assert_eq!(cfg.window_size(), DEFAULT_WINDOW_SIZE);
        assert_eq!(cfg.display_size(), DEFAULT_DISPLAY_SIZE);
    }

    #[test]
    fn malformed_bind_address_falls_back() {
        let mut cfg = ViewerConfig::default();
        cfg.network.bind_address = "not-an-ip".into();
        cfg.network.port = 1999;
        let lc = cfg.listener_config();
        assert_eq!(lc.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(lc.port, 1999);
    }

    #[test]
    fn capture_settings_reach_the_source() {
        let parsed: ViewerConfig =
            toml::from_str("[capture]\npixel_format = \"bgra32\"\nprobe_timeout_ms = 750\n")
                .unwrap();
        let source = parsed.ffmpeg_source();
        assert_eq!(source.pixel_format(), PixelFormat::Bgra32);
        assert_eq!(source.probe_timeout(), Duration::from_millis(750));
        assert_eq!(
            ViewerConfig::default().ffmpeg_source().pixel_format(),
            PixelFormat::Bgr24
        );
    }

    #[test]
    fn fps_history_is_passed_through() {
        let mut cfg = ViewerConfig::default();
        cfg.capture.fps_history_length = 30;
        assert_eq!(cfg.worker_config("rtmp://x").fps_history, 30);
    }
}
