//! Handshake listener integration tests over real TCP on localhost.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use streamview_core::{
    ChannelHandoff, HANDSHAKE_SIZE, HandshakeListener, ListenerConfig, ListenerStats,
    RTMP_VERSION,
};

// ── Helpers ──────────────────────────────────────────────────────

fn ephemeral_config() -> ListenerConfig {
    ListenerConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

struct Running {
    addr: SocketAddr,
    stats: Arc<ListenerStats>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

async fn start(listener: HandshakeListener) -> Running {
    let addr = listener.local_addr().unwrap();
    let stats = listener.stats();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(listener.run(shutdown.clone()));
    Running {
        addr,
        stats,
        shutdown,
        task,
    }
}

fn message(seed: u8) -> Vec<u8> {
    (0..HANDSHAKE_SIZE)
        .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
        .collect()
}

/// Run the client side of the handshake and return the stream and the
/// hello that was sent.
async fn client_handshake(addr: SocketAddr, seed: u8) -> (TcpStream, Vec<u8>) {
    let mut client = TcpStream::connect(addr).await.unwrap();
    let hello = message(seed);
    client.write_all(&hello).await.unwrap();

    let mut reply1 = vec![0u8; HANDSHAKE_SIZE];
    client.read_exact(&mut reply1).await.unwrap();
    assert_eq!(reply1[0], RTMP_VERSION);

    client.write_all(&message(seed.wrapping_add(1))).await.unwrap();

    let mut reply2 = vec![0u8; HANDSHAKE_SIZE];
    client.read_exact(&mut reply2).await.unwrap();
    assert_eq!(reply2, hello, "reply 2 must echo the client hello");

    (client, hello)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timeout waiting for close")
        .unwrap_or(0);
    assert_eq!(n, 0, "server sent bytes past the handshake");
}

// ── Handshake ────────────────────────────────────────────────────

#[tokio::test]
async fn valid_handshake_is_handed_off() {
    let (handoff, mut established) = ChannelHandoff::new(4);
    let listener = HandshakeListener::bind(ephemeral_config())
        .await
        .unwrap()
        .with_handoff(handoff);
    let running = start(listener).await;

    let (mut client, hello) = client_handshake(running.addr, 1).await;

    let conn = tokio::time::timeout(Duration::from_secs(5), established.recv())
        .await
        .expect("timeout")
        .expect("handoff channel closed");
    assert_eq!(&conn.client_hello[..], &hello[..]);
    assert_eq!(conn.peer, client.local_addr().unwrap());
    assert_eq!(running.stats.established(), 1);

    // exactly two server writes: nothing follows once the decoder lets go
    drop(conn);
    expect_eof(&mut client).await;

    running.shutdown.cancel();
    running.task.await.unwrap();
}

#[tokio::test]
async fn pipelined_bytes_stay_in_the_socket() {
    let (handoff, mut established) = ChannelHandoff::new(4);
    let listener = HandshakeListener::bind(ephemeral_config())
        .await
        .unwrap()
        .with_handoff(handoff);
    let running = start(listener).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    client.write_all(&message(5)).await.unwrap();
    let mut reply = vec![0u8; HANDSHAKE_SIZE];
    client.read_exact(&mut reply).await.unwrap();

    // ack followed immediately by the first chunk-stream bytes
    let mut ack = message(6);
    ack.extend_from_slice(&[0x02, 0x00, 0x00]);
    client.write_all(&ack).await.unwrap();
    client.read_exact(&mut reply).await.unwrap();

    let mut conn = established.recv().await.unwrap();
    let mut chunk = [0u8; 3];
    conn.stream.read_exact(&mut chunk).await.unwrap();
    assert_eq!(chunk, [0x02, 0x00, 0x00]);

    running.shutdown.cancel();
}

#[tokio::test]
async fn default_handoff_closes_connection() {
    let listener = HandshakeListener::bind(ephemeral_config()).await.unwrap();
    let running = start(listener).await;

    let (mut client, _) = client_handshake(running.addr, 9).await;
    expect_eof(&mut client).await;
    assert_eq!(running.stats.established(), 1);

    running.shutdown.cancel();
}

// ── Failure isolation ────────────────────────────────────────────

#[tokio::test]
async fn short_hello_aborts_only_that_connection() {
    let (handoff, mut established) = ChannelHandoff::new(4);
    let listener = HandshakeListener::bind(ephemeral_config())
        .await
        .unwrap()
        .with_handoff(handoff);
    let running = start(listener).await;

    let mut broken = TcpStream::connect(running.addr).await.unwrap();
    broken.write_all(&[0x03; 500]).await.unwrap();
    broken.shutdown().await.unwrap();
    expect_eof(&mut broken).await;

    let stats = Arc::clone(&running.stats);
    wait_until("abort", || stats.aborted() == 1).await;

    let (_client, hello) = client_handshake(running.addr, 2).await;
    let conn = established.recv().await.unwrap();
    assert_eq!(&conn.client_hello[..], &hello[..]);
    assert_eq!(running.stats.accepted(), 2);
    assert_eq!(running.stats.established(), 1);
    assert_eq!(running.stats.aborted(), 1);

    running.shutdown.cancel();
}

#[tokio::test]
async fn stalled_client_does_not_block_others() {
    let listener = HandshakeListener::bind(ephemeral_config()).await.unwrap();
    let running = start(listener).await;

    let _stalled = TcpStream::connect(running.addr).await.unwrap();
    let (_client, _) = tokio::time::timeout(
        Duration::from_secs(5),
        client_handshake(running.addr, 3),
    )
    .await
    .expect("handshake blocked behind a stalled connection");

    running.shutdown.cancel();
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    let config = ephemeral_config().with_handshake_timeout(Duration::from_millis(200));
    let listener = HandshakeListener::bind(config).await.unwrap();
    let running = start(listener).await;

    let mut stalled = TcpStream::connect(running.addr).await.unwrap();
    stalled.write_all(&[0u8; 100]).await.unwrap();
    expect_eof(&mut stalled).await;

    let stats = Arc::clone(&running.stats);
    wait_until("timeout abort", || stats.aborted() == 1).await;

    running.shutdown.cancel();
}

#[tokio::test]
async fn many_aborts_leave_listener_accepting() {
    let listener = HandshakeListener::bind(ephemeral_config()).await.unwrap();
    let running = start(listener).await;

    for _ in 0..10 {
        let stream = TcpStream::connect(running.addr).await.unwrap();
        drop(stream);
    }
    let stats = Arc::clone(&running.stats);
    wait_until("ten aborts", || stats.aborted() == 10).await;

    client_handshake(running.addr, 4).await;
    running.shutdown.cancel();
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_stops_listener_and_pending_handshakes() {
    let listener = HandshakeListener::bind(ephemeral_config()).await.unwrap();
    let running = start(listener).await;

    let mut pending = TcpStream::connect(running.addr).await.unwrap();
    let stats = Arc::clone(&running.stats);
    wait_until("accept", || stats.accepted() == 1).await;

    running.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .expect("listener did not stop")
        .unwrap();
    expect_eof(&mut pending).await;
}
