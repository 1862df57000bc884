//! Capture session state machine.
//!
//! The worker owns exactly one `StreamSession`. Transitions are validated
//! and return `Result` instead of panicking.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Streaming
//!       ▲                │              │
//!       └────────────────┴──────────────┘
//! ```

use std::fmt;
use std::time::Instant;

use crate::error::ViewerError;
use crate::frame::Resolution;

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No open stream. Initial and terminal state.
    #[default]
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// The stream is open and frames are being read.
    Streaming {
        /// When the session entered `Streaming`.
        since: Instant,
    },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming { .. } => write!(f, "Streaming"),
        }
    }
}

// ── StreamSession ────────────────────────────────────────────────

/// One capture attempt against a source locator.
#[derive(Debug, Clone)]
pub struct StreamSession {
    locator: String,
    state: SessionState,
    resolution: Option<Resolution>,
}

impl StreamSession {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            state: SessionState::Disconnected,
            resolution: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Resolution of the open stream; unset unless `Streaming`.
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, SessionState::Streaming { .. })
    }

    /// How long the session has been streaming.
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self.state {
            SessionState::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), ViewerError> {
        match self.state {
            SessionState::Disconnected => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            _ => Err(ViewerError::InvalidTransition(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`. Records the stream's resolution.
    pub fn begin_streaming(&mut self, resolution: Resolution) -> Result<(), ViewerError> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Streaming {
                    since: Instant::now(),
                };
                self.resolution = Some(resolution);
                Ok(())
            }
            _ => Err(ViewerError::InvalidTransition(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Reset to `Disconnected` from any state, clearing the resolution.
    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.resolution = None;
    }
}
