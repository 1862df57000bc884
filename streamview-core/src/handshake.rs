//! Server side of the simplified RTMP handshake.
//!
//! ## Wire format
//!
//! ```text
//! client ─ hello  (1536 bytes, opaque) ─────────────► server
//! client ◄──────────── reply 1 (0x03 + 1535 random) ─ server
//! client ─ ack    (1536 bytes, opaque) ─────────────► server
//! client ◄──────────── reply 2 (echo of hello) ────── server
//! ```
//!
//! Reads and writes are exact: the handshake never consumes a byte past
//! the client's ack, so whatever the client pipelines after it is still
//! in the socket for the chunk-stream decoder.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::HandshakeError;

/// Size of every handshake message.
pub const HANDSHAKE_SIZE: usize = 1536;

/// Version byte the server answers with.
pub const RTMP_VERSION: u8 = 3;

// ── HandshakeState ───────────────────────────────────────────────

/// Per-connection handshake progress.
///
/// ```text
///  AwaitClientHello ──► AwaitClientAck ──► Established
///         │                    │
///         └───────► Aborted ◄──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    AwaitClientHello,
    AwaitClientAck,
    Established,
    Aborted,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitClientHello => write!(f, "AwaitClientHello"),
            Self::AwaitClientAck => write!(f, "AwaitClientAck"),
            Self::Established => write!(f, "Established"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

// ── EstablishedConnection ────────────────────────────────────────

/// A connection that completed the handshake, ready for chunk-stream
/// decoding.
#[derive(Debug)]
pub struct EstablishedConnection<S = TcpStream> {
    pub stream: S,
    pub peer: SocketAddr,
    /// The client's hello, as echoed back in reply 2.
    pub client_hello: Bytes,
}

// ── ServerHandshake ──────────────────────────────────────────────

/// One server-side handshake.
pub struct ServerHandshake {
    state: HandshakeState,
    reply: Vec<u8>,
}

impl ServerHandshake {
    /// A handshake whose reply 1 carries a fresh random payload.
    pub fn new() -> Self {
        let mut random = [0u8; HANDSHAKE_SIZE - 1];
        rand::thread_rng().fill_bytes(&mut random);
        Self::with_random(random)
    }

    /// A handshake with a caller-chosen reply 1 payload.
    pub fn with_random(random: [u8; HANDSHAKE_SIZE - 1]) -> Self {
        let mut reply = Vec::with_capacity(HANDSHAKE_SIZE);
        reply.push(RTMP_VERSION);
        reply.extend_from_slice(&random);
        Self {
            state: HandshakeState::AwaitClientHello,
            reply,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The 1536 bytes sent as reply 1.
    pub fn server_reply(&self) -> &[u8] {
        &self.reply
    }

    /// Run the exchange on `stream`, returning the client's hello.
    ///
    /// Any I/O failure or short read leaves the handshake in
    /// [`HandshakeState::Aborted`].
    pub async fn perform<S>(&mut self, stream: &mut S) -> Result<Bytes, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.exchange(stream).await {
            Ok(hello) => {
                self.state = HandshakeState::Established;
                Ok(hello)
            }
            Err(e) => {
                self.state = HandshakeState::Aborted;
                Err(e)
            }
        }
    }

    async fn exchange<S>(&mut self, stream: &mut S) -> Result<Bytes, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state = HandshakeState::AwaitClientHello;
        let hello = self.read_message(stream).await?;
        self.write_message(stream, &self.reply).await?;

        self.state = HandshakeState::AwaitClientAck;
        // the ack's content is not validated
        let _ack = self.read_message(stream).await?;
        self.write_message(stream, &hello).await?;

        Ok(Bytes::from(hello))
    }

    async fn read_message<S>(&self, stream: &mut S) -> Result<Vec<u8>, HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; HANDSHAKE_SIZE];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| HandshakeError::from_io(self.state, e))?;
        Ok(buf)
    }

    async fn write_message<S>(&self, stream: &mut S, message: &[u8]) -> Result<(), HandshakeError>
    where
        S: AsyncWrite + Unpin,
    {
        stream
            .write_all(message)
            .await
            .map_err(|e| HandshakeError::from_io(self.state, e))?;
        stream
            .flush()
            .await
            .map_err(|e| HandshakeError::from_io(self.state, e))
    }
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn message(seed: u8) -> Vec<u8> {
        (0..HANDSHAKE_SIZE)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    #[test]
    fn reply_starts_with_version() {
        let hs = ServerHandshake::new();
        assert_eq!(hs.server_reply().len(), HANDSHAKE_SIZE);
        assert_eq!(hs.server_reply()[0], RTMP_VERSION);
        assert_eq!(hs.state(), HandshakeState::AwaitClientHello);
    }

    #[test]
    fn replies_are_randomised() {
        let a = ServerHandshake::new();
        let b = ServerHandshake::new();
        assert_ne!(a.server_reply()[1..], b.server_reply()[1..]);
    }

    #[tokio::test]
    async fn full_exchange_echoes_hello() {
        let hello = message(1);
        let ack = message(2);
        let mut hs = ServerHandshake::with_random([0x5a; HANDSHAKE_SIZE - 1]);
        let reply = hs.server_reply().to_vec();

        let mut mock = Builder::new()
            .read(&hello)
            .write(&reply)
            .read(&ack)
            .write(&hello)
            .build();

        let echoed = hs.perform(&mut mock).await.unwrap();
        assert_eq!(hs.state(), HandshakeState::Established);
        assert_eq!(&echoed[..], &hello[..]);
    }

    #[tokio::test]
    async fn fragmented_hello_is_reassembled() {
        let hello = message(9);
        let ack = message(10);
        let mut hs = ServerHandshake::with_random([0; HANDSHAKE_SIZE - 1]);
        let reply = hs.server_reply().to_vec();

        let mut mock = Builder::new()
            .read(&hello[..1])
            .read(&hello[1..700])
            .read(&hello[700..])
            .write(&reply)
            .read(&ack)
            .write(&hello)
            .build();

        hs.perform(&mut mock).await.unwrap();
        assert_eq!(hs.state(), HandshakeState::Established);
    }

    #[tokio::test]
    async fn short_hello_aborts() {
        let mut hs = ServerHandshake::new();
        let mut mock = Builder::new().read(&[7u8; 500]).build();

        let err = hs.perform(&mut mock).await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::ShortRead {
                stage: HandshakeState::AwaitClientHello
            }
        ));
        assert_eq!(hs.state(), HandshakeState::Aborted);
    }

    #[tokio::test]
    async fn short_ack_aborts() {
        let hello = message(3);
        let mut hs = ServerHandshake::with_random([1; HANDSHAKE_SIZE - 1]);
        let reply = hs.server_reply().to_vec();
        let mut mock = Builder::new()
            .read(&hello)
            .write(&reply)
            .read(&[0u8; 100])
            .build();

        let err = hs.perform(&mut mock).await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::ShortRead {
                stage: HandshakeState::AwaitClientAck
            }
        ));
        assert_eq!(hs.state(), HandshakeState::Aborted);
    }

    #[tokio::test]
    async fn write_failure_aborts() {
        let hello = message(4);
        let mut hs = ServerHandshake::new();
        let mut mock = Builder::new()
            .read(&hello)
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer gone",
            ))
            .build();

        let err = hs.perform(&mut mock).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Io { .. }));
        assert_eq!(hs.state(), HandshakeState::Aborted);
    }
}
