//! Client behaviour against scripted servers

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::SinkExt;
use rcon_protocol::config::ClientConfig;
use rcon_protocol::core::codec::RconCodec;
use rcon_protocol::core::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE,
};
use rcon_protocol::error::ProtocolError;
use rcon_protocol::protocol::message::{RequestKind, Response};
use rcon_protocol::service::client::{ClientState, RconClient};
use rcon_protocol::transport::tcp;
use rcon_protocol::utils::logging::EventLog;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Raw = Framed<TcpStream, RconCodec>;

/// Accept one connection and hand it to `script`.
async fn scripted_server<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(Raw) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(Framed::new(stream, RconCodec::default())).await;
    });
    (addr, handle)
}

/// Read the auth packet and accept it the way Source servers do: an empty
/// value packet first, then the auth response.
async fn accept_auth(raw: &mut Raw) {
    let auth = tcp::read_framed_packet(raw, Duration::from_secs(2), &EventLog::default()).await;
    assert_eq!(auth.packet_type(), Some(SERVERDATA_AUTH));
    let id = auth.id().unwrap();

    raw.send(Packet::new(id, SERVERDATA_RESPONSE_VALUE, Vec::new()))
        .await
        .unwrap();
    raw.send(Packet::new(id, SERVERDATA_AUTH_RESPONSE, Vec::new()))
        .await
        .unwrap();
}

async fn next_command(raw: &mut Raw) -> (i32, String) {
    let packet = tcp::read_framed_packet(raw, Duration::from_secs(2), &EventLog::default()).await;
    assert_eq!(packet.packet_type(), Some(SERVERDATA_EXECCOMMAND));
    (packet.id().unwrap(), packet.body_string())
}

fn client(addr: SocketAddr) -> RconClient {
    let mut config = ClientConfig::new(addr.to_string(), "pw");
    config.receive_timeout = Duration::from_millis(300);
    config.connection_timeout = Duration::from_millis(500);
    RconClient::new(config)
}

#[tokio::test]
async fn test_auth_skips_leading_value_packet() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let (id, body) = next_command(&mut raw).await;
        raw.send(Packet::new(id, SERVERDATA_RESPONSE_VALUE, format!("got {body}")))
            .await
            .unwrap();
    })
    .await;

    let client = client(addr);
    client.start(true).await.expect("authenticated");
    assert_eq!(client.state(), ClientState::Ready);

    let response = client
        .send_sync("status", 3, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::responded("got status"));

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_timeout_when_server_is_silent() {
    let (addr, server) = scripted_server(|raw| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(raw);
    })
    .await;

    let client = client(addr);
    let result = client.start(true).await;
    assert!(matches!(result, Err(ProtocolError::AuthTimeout)));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(!client.is_connected());

    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_leaves_client_inert() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let client = RconClient::with_log_hook(
        ClientConfig::new(addr.to_string(), "pw"),
        Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string())),
    );

    assert!(matches!(
        client.start(true).await,
        Err(ProtocolError::ConnectError(_))
    ));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(lines
        .lock()
        .unwrap()
        .iter()
        .any(|l| l == "Attempting connection to RCON server..."));
}

#[tokio::test]
async fn test_invalid_address_is_config_error() {
    let client = RconClient::new(ClientConfig::new("rcon.example.com:27015", "pw"));
    assert!(matches!(
        client.start(true).await,
        Err(ProtocolError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_unrelated_packets_are_discarded() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let (id, _) = next_command(&mut raw).await;

        raw.send(Packet::new(-1, SERVERDATA_RESPONSE_VALUE, Vec::new()))
            .await
            .unwrap();
        raw.send(Packet::new(id + 1, SERVERDATA_RESPONSE_VALUE, "stale"))
            .await
            .unwrap();
        raw.send(Packet::new(id, SERVERDATA_RESPONSE_VALUE, "fresh"))
            .await
            .unwrap();
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    let response = client
        .send_sync("status", 40, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::responded("fresh"));

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_empty_frame_is_an_empty_answer() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        next_command(&mut raw).await;
        raw.get_mut().write_all(&0i32.to_le_bytes()).await.unwrap();
        raw.get_mut().flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    let response = client
        .send_sync("noop", 2, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::responded(""));

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_slow_reply_outlasts_one_receive_timeout() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let (id, _) = next_command(&mut raw).await;
        tokio::time::sleep(Duration::from_millis(450)).await;
        raw.send(Packet::new(id, SERVERDATA_RESPONSE_VALUE, "slow"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    let response = client
        .send_sync("changelevel", 2, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::responded("slow"));
    assert!(client.is_connected());

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_silence_spends_retry_budget() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        next_command(&mut raw).await;
        tokio::time::sleep(Duration::from_millis(800)).await;
    })
    .await;

    let mut config = ClientConfig::new(addr.to_string(), "pw");
    config.receive_timeout = Duration::from_millis(100);
    config.max_receive_retries = 3;
    let client = RconClient::new(config);
    client.start(true).await.unwrap();

    let started = Instant::now();
    let response = client
        .send_sync("status", 2, RequestKind::ExecCommand, true)
        .await;
    let waited = started.elapsed();

    assert_eq!(response, Response::no_response());
    assert!(waited >= Duration::from_millis(300), "gave up after {waited:?}");
    assert!(waited < Duration::from_millis(700), "waited {waited:?}");
    // Silence alone does not drop the session.
    assert!(client.is_connected());

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_peer_drop_mid_request_returns_promptly() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        next_command(&mut raw).await;
        drop(raw);
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();

    let started = Instant::now();
    let response = client
        .send_sync("status", 2, RequestKind::ExecCommand, true)
        .await;

    assert_eq!(response, Response::no_response());
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!client.is_connected());
    assert_eq!(client.state(), ClientState::Disconnected);

    // The dead stream is gone; later sends fail without I/O.
    let sent = client.metrics().snapshot().packets_sent;
    let again = client
        .send_sync("status", 3, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(again, Response::no_response());
    assert_eq!(client.metrics().snapshot().packets_sent, sent);

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_full_size_response_body_is_accepted() {
    let body = "r".repeat(4096);
    let expected = body.clone();
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let (id, _) = next_command(&mut raw).await;

        let mut frame = Vec::with_capacity(4 + 4106);
        frame.extend_from_slice(&4106i32.to_le_bytes());
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(&SERVERDATA_RESPONSE_VALUE.to_le_bytes());
        frame.extend_from_slice(body.as_bytes());
        frame.extend_from_slice(&[0, 0]);
        raw.get_mut().write_all(&frame).await.unwrap();
        raw.get_mut().flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    let response = client
        .send_sync("cvarlist", 4, RequestKind::ExecCommand, true)
        .await;
    assert!(response.server_responded);
    assert_eq!(response.data, expected);

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_frame_over_client_limit_drops_session() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        next_command(&mut raw).await;
        raw.get_mut()
            .write_all(&100_000i32.to_le_bytes())
            .await
            .unwrap();
        raw.get_mut().flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    let response = client
        .send_sync("status", 2, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::no_response());
    assert!(!client.is_connected());

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_retry_budget_bounds_discarding() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let (id, _) = next_command(&mut raw).await;
        for _ in 0..5 {
            raw.send(Packet::new(id + 100, SERVERDATA_RESPONSE_VALUE, "noise"))
                .await
                .unwrap();
        }
        raw.send(Packet::new(id, SERVERDATA_RESPONSE_VALUE, "late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .await;

    let mut config = ClientConfig::new(addr.to_string(), "pw");
    config.receive_timeout = Duration::from_millis(300);
    config.max_receive_retries = 3;
    let client = RconClient::new(config);
    client.start(true).await.unwrap();

    let response = client
        .send_sync("status", 2, RequestKind::ExecCommand, true)
        .await;
    assert!(!response.server_responded);

    client.shutdown().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_send_after_shutdown_is_refused() {
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    client.shutdown().await;

    assert_eq!(client.state(), ClientState::Closed);
    let response = client
        .send_sync("status", 2, RequestKind::ExecCommand, true)
        .await;
    assert_eq!(response, Response::no_response());
    assert!(matches!(
        client.start(true).await,
        Err(ProtocolError::ConnectionClosed)
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn test_queued_request_without_callback_is_sent() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let (addr, server) = scripted_server(|mut raw| async move {
        accept_auth(&mut raw).await;
        let command = next_command(&mut raw).await;
        let _ = tx.send(command);
    })
    .await;

    let client = client(addr);
    client.start(true).await.unwrap();
    client.send_async("say hello", 9, RequestKind::ExecCommand, None);

    let (id, body) = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((id, body.as_str()), (9, "say hello"));

    client.shutdown().await;
    server.await.unwrap();
}
