use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;
use xfer::transfer::client::{SendPipeline, SendState};
use xfer::transfer::core::{
    PacketHeader, Protocol, Result, Role, SessionConfig, Termination, TransferError,
    TransferSession, TransferStats,
};
use xfer::transfer::server::{ReceivePipeline, ReceiveState};

// Use serial_test so loopback transfers don't compete for bandwidth
use serial_test::serial;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn setup_test_env() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Binds a receiver on an ephemeral loopback port and starts it.
async fn start_receiver(
    protocol: Protocol,
    file: Option<&Path>,
    timeout: Duration,
) -> (SocketAddr, JoinHandle<(Result<TransferStats>, ReceiveState)>) {
    let mut config = SessionConfig::server(protocol, 0)
        .with_bind(LOOPBACK)
        .with_timeout(timeout);
    config.file = file.map(Path::to_path_buf);

    let mut session = TransferSession::new(Role::Server, config).unwrap();
    session.init().await.unwrap();
    let addr = session.endpoint().local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut pipeline = ReceivePipeline::new(session);
        let result = pipeline.run().await;
        (result, pipeline.state())
    });

    // Give the receiver task a head start
    tokio::time::sleep(Duration::from_millis(100)).await;
    (addr, handle)
}

async fn send(config: SessionConfig) -> (Result<TransferStats>, SendState) {
    let mut session = TransferSession::new(Role::Client, config).unwrap();
    session.init().await.unwrap();
    let mut pipeline = SendPipeline::new(session);
    let result = pipeline.run().await;
    (result, pipeline.state())
}

#[tokio::test]
#[serial]
async fn test_tcp_packet_transfer() {
    setup_test_env();

    let (addr, receiver) = start_receiver(Protocol::Stream, None, Duration::from_secs(5)).await;

    let config =
        SessionConfig::client(Protocol::Stream, "127.0.0.1", addr.port()).with_packets(1024, 10);
    let (sent, send_state) = send(config).await;
    let sent = sent.unwrap();
    assert_eq!(send_state, SendState::Done);
    assert_eq!(sent.bytes_moved, 10 * 1024);
    assert_eq!(sent.packets_moved(), 10);

    let (received, recv_state) = receiver.await.unwrap();
    assert!(received.is_ok(), "Receive failed: {:?}", received.err());
    let received = received.unwrap();
    assert_eq!(recv_state, ReceiveState::Done);
    assert_eq!(received.bytes_moved, 10 * 1024);
    assert_eq!(received.packet_size, 1024);
    assert_eq!(received.packets_expected, 10);
    assert_eq!(received.packets_moved(), 10);
    assert_eq!(received.termination, Termination::PeerClosed);
    assert!(received.end_time >= received.start_time);

    let report = received.report().unwrap();
    assert!(report.contains("Bytes received: 10240"));
    assert!(report.contains("Protocol: TCP"));
}

#[tokio::test]
#[serial]
async fn test_udp_packet_transfer() {
    setup_test_env();

    let (addr, receiver) =
        start_receiver(Protocol::Datagram, None, Duration::from_secs(2)).await;

    let config =
        SessionConfig::client(Protocol::Datagram, "127.0.0.1", addr.port()).with_packets(1024, 20);
    let (sent, send_state) = send(config).await;
    assert!(sent.is_ok(), "Send failed: {:?}", sent.err());
    assert_eq!(send_state, SendState::Done);

    let (received, recv_state) = receiver.await.unwrap();
    let received = received.unwrap();
    assert_eq!(recv_state, ReceiveState::Done);
    assert_eq!(received.bytes_moved, 20 * 1024);
    assert_eq!(received.packets_moved(), 20);
    assert_eq!(received.termination, Termination::Completed);
}

#[tokio::test]
#[serial]
async fn test_tcp_file_transfer() {
    setup_test_env();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.bin");
    let destination = dir.path().join("received.bin");
    // Not a multiple of the chunk size, so the last chunk is short
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &content).unwrap();

    let (addr, receiver) = start_receiver(
        Protocol::Stream,
        Some(&destination),
        Duration::from_secs(5),
    )
    .await;

    let config = SessionConfig::client(Protocol::Stream, "127.0.0.1", addr.port())
        .with_file(&source);
    let (sent, _) = send(config).await;
    let sent = sent.unwrap();
    assert_eq!(sent.bytes_moved, 10_000);
    assert!(sent.report().is_none());

    let (received, _) = receiver.await.unwrap();
    let received = received.unwrap();
    assert_eq!(received.bytes_moved, 10_000);
    assert_eq!(received.termination, Termination::PeerClosed);

    assert_eq!(std::fs::read(&destination).unwrap(), content);
}

#[tokio::test]
#[serial]
async fn test_udp_file_transfer() {
    setup_test_env();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.bin");
    let destination = dir.path().join("received.bin");
    // Two full 4096-byte datagrams and a short one
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(&source, &content).unwrap();

    let (addr, receiver) = start_receiver(
        Protocol::Datagram,
        Some(&destination),
        Duration::from_millis(500),
    )
    .await;

    let config = SessionConfig::client(Protocol::Datagram, "127.0.0.1", addr.port())
        .with_file(&source);
    let (sent, send_state) = send(config).await;
    let sent = sent.unwrap();
    assert_eq!(send_state, SendState::Done);
    assert_eq!(sent.bytes_moved, 10_000);

    let (received, recv_state) = tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver did not stop")
        .unwrap();
    let received = received.unwrap();
    assert_eq!(recv_state, ReceiveState::Done);
    assert_eq!(received.bytes_moved, 10_000);
    // A file sink has no header to count against, so only silence ends it
    assert_eq!(received.termination, Termination::InactivityTimeout);

    assert_eq!(std::fs::read(&destination).unwrap(), content);
}

#[cfg(target_os = "linux")]
#[tokio::test]
#[serial]
async fn test_destination_write_failure() {
    setup_test_env();

    // Every write to /dev/full fails with ENOSPC
    let (addr, receiver) = start_receiver(
        Protocol::Stream,
        Some(Path::new("/dev/full")),
        Duration::from_secs(5),
    )
    .await;

    let config =
        SessionConfig::client(Protocol::Stream, "127.0.0.1", addr.port()).with_packets(1024, 10);
    let _ = send(config).await;

    let (received, recv_state) = tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver did not stop")
        .unwrap();
    assert!(matches!(
        received,
        Err(TransferError::Io {
            operation: "write",
            ..
        })
    ));
    assert_eq!(recv_state, ReceiveState::Failed);
}

#[tokio::test]
#[serial]
async fn test_sender_watchdog_expires() {
    setup_test_env();

    // Accept the connection and never read from it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let sink = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let watchdog = Duration::from_millis(300);
    let config = SessionConfig::client(Protocol::Stream, "127.0.0.1", port)
        .with_packets(65536, 100_000)
        .with_timeout(watchdog);
    let (result, state) = tokio::time::timeout(Duration::from_secs(10), send(config))
        .await
        .expect("sender did not time out");

    assert!(matches!(result, Err(TransferError::Timeout(t)) if t == watchdog));
    assert_eq!(state, SendState::Failed);
    sink.abort();
}

#[tokio::test]
#[serial]
async fn test_udp_receiver_gives_up_on_silence() {
    setup_test_env();

    let budget = Duration::from_millis(300);
    let (addr, receiver) = start_receiver(Protocol::Datagram, None, budget).await;

    // One datagram announcing ten, then nothing
    let mut datagram = PacketHeader {
        packet_count: 10,
        packet_size: 64,
    }
    .encode()
    .to_vec();
    datagram.resize(64, b'a');
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&datagram, addr).await.unwrap();

    let (received, recv_state) = tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver did not give up")
        .unwrap();
    let received = received.unwrap();
    assert_eq!(recv_state, ReceiveState::Done);
    assert_eq!(received.termination, Termination::InactivityTimeout);
    assert_eq!(received.bytes_moved, 64);
    assert_eq!(received.packets_moved(), 1);
    assert_eq!(received.packets_expected, 10);
    // The clock stops at the last datagram, not when the watchdog fired
    assert!(received.elapsed_ms() < budget.as_millis() as i64);
}

#[tokio::test]
#[serial]
async fn test_connect_refused() {
    setup_test_env();

    // Grab a free port and release it so nothing is listening there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = SessionConfig::client(Protocol::Stream, "127.0.0.1", port);
    let (result, state) = send(config).await;
    assert!(matches!(result, Err(TransferError::Connect { .. })));
    assert_eq!(state, SendState::Failed);
}

#[tokio::test]
#[serial]
async fn test_missing_destination() {
    setup_test_env();

    let config = SessionConfig::client(Protocol::Datagram, "", 7000);
    let mut session = TransferSession::new(Role::Client, config).unwrap();
    assert!(matches!(
        session.init().await,
        Err(TransferError::NoDestination)
    ));
}
