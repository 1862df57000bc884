//! Domain-specific error types for the ingest pipeline.
//!
//! Nothing in the core is fatal to the process: source errors feed the
//! reconnect loop and handshake errors abort a single connection.

use std::time::Duration;
use thiserror::Error;

use crate::handshake::HandshakeState;

/// The canonical error type for the ingest pipeline.
#[derive(Debug, Error)]
pub enum ViewerError {
    // ── Source Errors ────────────────────────────────────────────
    /// The source locator could not be opened as a decodable stream.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The stream metadata probe failed or produced unusable output.
    #[error("probe failed: {0}")]
    Probe(String),

    /// The stream reported a resolution that cannot carry frames.
    #[error("invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    // ── Session Errors ───────────────────────────────────────────
    /// A session state transition was requested from the wrong state.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A connection failed its handshake.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Metadata could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── HandshakeError ────────────────────────────────────────────────

/// Typed error for a single inbound handshake.
///
/// Every variant moves the connection to [`HandshakeState::Aborted`].
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer closed before sending a full 1536-byte message.
    #[error("short read in {stage}: connection closed")]
    ShortRead { stage: HandshakeState },

    /// The socket failed while reading or writing.
    #[error("handshake I/O error in {stage}: {source}")]
    Io {
        stage: HandshakeState,
        #[source]
        source: std::io::Error,
    },

    /// The handshake did not complete within its deadline.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The listener was shut down while the handshake was in flight.
    #[error("handshake cancelled")]
    Cancelled,
}

impl HandshakeError {
    /// Classify an I/O error raised while in `stage`.
    pub fn from_io(stage: HandshakeState, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            HandshakeError::ShortRead { stage }
        } else {
            HandshakeError::Io { stage, source: err }
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for ViewerError {
    fn from(s: String) -> Self {
        ViewerError::Other(s)
    }
}

impl From<&str> for ViewerError {
    fn from(s: &str) -> Self {
        ViewerError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for ViewerError {
    fn from(e: serde_json::Error) -> Self {
        ViewerError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ViewerError::InvalidResolution {
            width: 0,
            height: 720,
        };
        assert!(e.to_string().contains("0x720"));

        let e = ViewerError::SourceUnavailable("rtmp://host/live".into());
        assert!(e.to_string().contains("rtmp://host/live"));
    }

    #[test]
    fn from_string() {
        let e: ViewerError = "something broke".into();
        assert!(matches!(e, ViewerError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: ViewerError = io_err.into();
        assert!(matches!(e, ViewerError::Connection(_)));
    }

    #[test]
    fn eof_is_classified_as_short_read() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        let e = HandshakeError::from_io(HandshakeState::AwaitClientHello, eof);
        assert!(matches!(
            e,
            HandshakeError::ShortRead {
                stage: HandshakeState::AwaitClientHello
            }
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let e = HandshakeError::from_io(HandshakeState::AwaitClientAck, reset);
        assert!(matches!(e, HandshakeError::Io { .. }));
        assert!(e.to_string().contains("AwaitClientAck"));
    }
}
