//! Rolling stream metrics: moving-average FPS and windowed bitrate.
//!
//! Everything here is pure computation. Callers pass timestamps in, so
//! the same code runs against the wall clock in the worker and against
//! synthetic instants in tests.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Rates at or above this many kbps are reported in Mbps.
pub const MBPS_THRESHOLD_KBPS: f64 = 2000.0;

// ── Bitrate ──────────────────────────────────────────────────────

/// Display unit attached to a bitrate sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitrateUnit {
    Kbps,
    Mbps,
}

impl BitrateUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            BitrateUnit::Kbps => "kbps",
            BitrateUnit::Mbps => "Mbps",
        }
    }
}

impl fmt::Display for BitrateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bitrate sample already promoted to its display unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bitrate {
    pub value: f64,
    pub unit: BitrateUnit,
}

impl Bitrate {
    /// Promote a kbps rate to Mbps when it reaches
    /// [`MBPS_THRESHOLD_KBPS`].
    pub fn from_kbps(kbps: f64) -> Self {
        if kbps >= MBPS_THRESHOLD_KBPS {
            Self {
                value: kbps / 1000.0,
                unit: BitrateUnit::Mbps,
            }
        } else {
            Self {
                value: kbps,
                unit: BitrateUnit::Kbps,
            }
        }
    }

    /// The rate expressed in kbps regardless of display unit.
    pub fn as_kbps(&self) -> f64 {
        match self.unit {
            BitrateUnit::Kbps => self.value,
            BitrateUnit::Mbps => self.value * 1000.0,
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit)
    }
}

// ── FpsWindow ────────────────────────────────────────────────────

/// Bounded FIFO of inter-frame intervals.
///
/// The average rate is the reciprocal of the arithmetic mean of the held
/// intervals. Holding `Duration`s keeps the running sum exact, so evicting
/// a sample never accumulates float drift.
pub struct FpsWindow {
    intervals: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl FpsWindow {
    /// A window holding at most `capacity` intervals (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            intervals: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    /// Admit one interval and return the recomputed average FPS.
    ///
    /// A zero interval (two frames stamped with the same instant) is
    /// skipped and yields `None` rather than an infinite rate.
    pub fn admit(&mut self, interval: Duration) -> Option<f64> {
        if interval.is_zero() {
            return None;
        }
        self.intervals.push_back(interval);
        self.total += interval;
        while self.intervals.len() > self.capacity {
            if let Some(oldest) = self.intervals.pop_front() {
                self.total -= oldest;
            }
        }
        self.average_fps()
    }

    /// Reciprocal of the mean held interval, or `None` when empty.
    pub fn average_fps(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        let mean = self.total.as_secs_f64() / self.intervals.len() as f64;
        Some(1.0 / mean)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.total = Duration::ZERO;
    }
}

// ── BitrateAccumulator ───────────────────────────────────────────

/// Byte/frame accumulator over an approximately one-second window.
///
/// The window closes once the accumulated frame count reaches the caller's
/// threshold (the current average FPS, rounded), at which point the rate
/// over the elapsed wall time is returned and the window restarts.
#[derive(Debug, Default)]
pub struct BitrateAccumulator {
    bytes: u64,
    frames: u32,
    window_start: Option<Instant>,
}

impl BitrateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the current window. The next frame opens a new one.
    pub fn reset(&mut self) {
        self.bytes = 0;
        self.frames = 0;
        self.window_start = None;
    }

    /// Discard the current window and start a new one at `now`.
    pub fn start_at(&mut self, now: Instant) {
        self.bytes = 0;
        self.frames = 0;
        self.window_start = Some(now);
    }

    /// Record one frame of `byte_count` bytes at the current instant.
    pub fn accumulate(&mut self, byte_count: u64, frame_threshold: u32) -> Option<Bitrate> {
        self.accumulate_at(Instant::now(), byte_count, frame_threshold)
    }

    /// Record one frame with an explicit timestamp.
    ///
    /// With no open window the frame only opens one at `now`, so a window
    /// counts the frames arriving after its start. Returns a rate only when
    /// the frame count reaches `frame_threshold` and the window has a
    /// non-zero duration. A window that has not yet elapsed keeps
    /// accumulating instead of dividing by zero.
    pub fn accumulate_at(
        &mut self,
        now: Instant,
        byte_count: u64,
        frame_threshold: u32,
    ) -> Option<Bitrate> {
        let Some(start) = self.window_start else {
            self.start_at(now);
            return None;
        };
        self.bytes = self.bytes.saturating_add(byte_count);
        self.frames = self.frames.saturating_add(1);

        if self.frames < frame_threshold.max(1) {
            return None;
        }

        let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return None;
        }

        // bits per millisecond == kilobits per second
        let kbps = (self.bytes as f64 * 8.0) / elapsed_ms;
        self.start_at(now);
        Some(Bitrate::from_kbps(kbps))
    }

    /// Frames counted in the open window.
    pub fn pending_frames(&self) -> u32 {
        self.frames
    }

    /// Bytes counted in the open window.
    pub fn pending_bytes(&self) -> u64 {
        self.bytes
    }
}

// ── MetricsAggregator ────────────────────────────────────────────

/// Metrics produced by a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetrics {
    /// Recomputed average FPS, absent for the seeding frame and for
    /// zero-length intervals.
    pub fps: Option<f64>,
    /// Closed bitrate window, if this frame closed one.
    pub bitrate: Option<Bitrate>,
}

/// Combines the FPS window and bitrate accumulator for one session.
pub struct MetricsAggregator {
    fps: FpsWindow,
    bitrate: BitrateAccumulator,
    last_frame: Option<Instant>,
    average_fps: Option<f64>,
}

impl MetricsAggregator {
    /// An aggregator averaging FPS over `history_len` intervals.
    pub fn new(history_len: usize) -> Self {
        Self {
            fps: FpsWindow::new(history_len),
            bitrate: BitrateAccumulator::new(),
            last_frame: None,
            average_fps: None,
        }
    }

    /// Reset all state for a freshly opened session.
    ///
    /// Nothing is timed from the open itself: decoder startup can take
    /// seconds, so the first frame anchors both FPS and bitrate.
    pub fn begin_session(&mut self) {
        self.fps.clear();
        self.bitrate.reset();
        self.last_frame = None;
        self.average_fps = None;
    }

    /// Admit an inter-frame interval; see [`FpsWindow::admit`].
    pub fn admit(&mut self, interval: Duration) -> Option<f64> {
        let fps = self.fps.admit(interval);
        if fps.is_some() {
            self.average_fps = fps;
        }
        fps
    }

    /// Accumulate a frame into the bitrate window at the current instant.
    pub fn accumulate_bitrate(&mut self, byte_count: u64, frame_threshold: u32) -> Option<Bitrate> {
        self.bitrate.accumulate(byte_count, frame_threshold)
    }

    /// Account for one frame of `byte_count` bytes that arrived at `now`.
    ///
    /// The first frame of a session only seeds the timestamp. The bitrate
    /// threshold tracks the current average FPS, so the window spans
    /// roughly one second whatever the stream's frame rate.
    pub fn record_frame_at(&mut self, now: Instant, byte_count: u64) -> FrameMetrics {
        let fps = match self.last_frame.replace(now) {
            Some(prev) => self.admit(now.saturating_duration_since(prev)),
            None => None,
        };

        // no window can close until the first interval is known
        let threshold = self.average_fps.map(frame_threshold).unwrap_or(u32::MAX);
        let bitrate = self.bitrate.accumulate_at(now, byte_count, threshold);

        FrameMetrics { fps, bitrate }
    }

    /// Latest average FPS for this session.
    pub fn average_fps(&self) -> Option<f64> {
        self.average_fps
    }

    pub fn history_len(&self) -> usize {
        self.fps.capacity()
    }
}

/// Frame-count threshold for a bitrate window at `average_fps`.
pub fn frame_threshold(average_fps: f64) -> u32 {
    let rounded = average_fps.round();
    if rounded.is_finite() && rounded >= 1.0 {
        rounded.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

// ── Tests ────────────────────────────────────────────────────────
