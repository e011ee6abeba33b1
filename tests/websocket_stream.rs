//! End-to-end tests against a local WebSocket producer

use framestream::{
    BackoffConfig, ConnectionState, QualityLabel, StreamClient, StreamConfig, StreamStatus,
    UpdateRate,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

const TOKEN: &str = "tok-abcdef123";
const PATIENCE: Duration = Duration::from_secs(10);

/// Minimal producer that accepts one connection at a time
struct Producer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Producer {
    async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    fn config(&self) -> StreamConfig {
        let mut config = StreamConfig::new(format!("ws://{}", self.addr), "run_7");
        config.backoff = BackoffConfig { base_ms: 100, cap_ms: Some(1000) };
        config
    }

    /// Accept the next client, returning the socket and the requested URI
    async fn accept(&self) -> anyhow::Result<(WebSocketStream<TcpStream>, String)> {
        let (stream, _) = self.listener.accept().await?;
        let (uri_tx, uri_rx) = oneshot::channel();
        let socket = accept_hdr_async(stream, |request: &Request, response: Response| {
            let _ = uri_tx.send(request.uri().to_string());
            Ok::<_, ErrorResponse>(response)
        })
        .await?;
        Ok((socket, uri_rx.await?))
    }
}

fn frame(step: u64, keyframe: bool) -> Message {
    Message::Text(
        json!({
            "type": "frame",
            "timestamp": "2025-01-15T10:30:00.250000",
            "data": {
                "timestep": step,
                "time": step as f64 * 0.01,
                "is_keyframe": keyframe,
                "data": { "voltage": -0.8 },
            },
            "_latency_ms": 40.0,
        })
        .to_string(),
    )
}

async fn wait_until(
    client: &StreamClient,
    predicate: impl Fn(&StreamStatus) -> bool,
) -> anyhow::Result<Arc<StreamStatus>> {
    let mut updates = client.subscribe(UpdateRate::Native);
    let reached = async {
        while let Some(status) = updates.next().await {
            if predicate(&status) {
                return Some(status);
            }
        }
        None
    };
    tokio::time::timeout(PATIENCE, reached)
        .await?
        .ok_or_else(|| anyhow::anyhow!("status stream ended"))
}

#[tokio::test]
async fn streams_frames_from_producer() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, uri) = producer.accept().await?;
    assert_eq!(uri, format!("/ws/runs/run_7?token={TOKEN}"));
    client.wait_for_state(ConnectionState::Connected, PATIENCE).await?;

    socket.send(frame(1, true)).await?;
    socket.send(frame(2, false)).await?;
    socket.send(Message::Binary(frame(3, false).into_data())).await?;

    let status = wait_until(&client, |s| s.metrics.total_frames_received == 3).await?;
    assert_eq!(status.quality, QualityLabel::Good);
    assert_eq!(status.metrics.keyframe_count, 1);
    assert_eq!(status.metrics.average_latency_ms, Some(40.0));

    let steps: Vec<u64> =
        client.frames().await?.iter().filter_map(|f| f.sequence.timestep).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn reserved_token_characters_reach_producer_intact() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let token = "a+b&c=d#e f";
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), token)?;
    client.connect()?;

    let (_socket, uri) = producer.accept().await?;
    let url = url::Url::parse(&format!("ws://{}{uri}", producer.addr))?;
    assert_eq!(url.path(), "/ws/runs/run_7");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs, vec![("token".to_string(), token.to_string())]);
    client.wait_for_state(ConnectionState::Connected, PATIENCE).await?;
    Ok(())
}

#[tokio::test]
async fn reconnects_after_producer_drops() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, _) = producer.accept().await?;
    socket.send(frame(1, true)).await?;
    wait_until(&client, |s| s.metrics.total_frames_received == 1).await?;
    drop(socket);

    let (_socket, _) = tokio::time::timeout(PATIENCE, producer.accept()).await??;
    let status = wait_until(&client, |s| s.state == ConnectionState::Connected).await?;
    assert_eq!(status.metrics.reconnect_attempts, 1);
    assert_eq!(status.metrics.total_frames_received, 1);
    assert_eq!(client.frames().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn remote_close_frame_schedules_reconnect() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, _) = producer.accept().await?;
    client.wait_for_state(ConnectionState::Connected, PATIENCE).await?;
    socket
        .close(Some(CloseFrame { code: CloseCode::Away, reason: "restarting".into() }))
        .await?;

    let status = wait_until(&client, |s| s.state == ConnectionState::Reconnecting).await?;
    assert_eq!(status.quality, QualityLabel::Disconnected);
    assert_eq!(status.retry_delay, Some(Duration::from_millis(100)));

    let (_socket, _) = tokio::time::timeout(PATIENCE, producer.accept()).await??;
    client.wait_for_state(ConnectionState::Connected, PATIENCE).await?;
    Ok(())
}

#[tokio::test]
async fn disconnect_sends_normal_closure() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, _) = producer.accept().await?;
    client.wait_for_state(ConnectionState::Connected, PATIENCE).await?;
    client.disconnect()?;

    let message = tokio::time::timeout(PATIENCE, socket.next()).await?;
    match message {
        Some(Ok(Message::Close(Some(close)))) => {
            assert_eq!(close.code, CloseCode::Normal);
            assert_eq!(close.reason, "client disconnect");
        }
        other => anyhow::bail!("expected a close frame, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // No reconnect follows an explicit disconnect
    let second = tokio::time::timeout(Duration::from_millis(500), producer.accept()).await;
    assert!(second.is_err());
    Ok(())
}

#[tokio::test]
async fn malformed_payload_is_counted_not_fatal() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, _) = producer.accept().await?;
    socket.send(Message::Text("not json at all".to_string())).await?;
    socket.send(frame(1, false)).await?;

    let status = wait_until(&client, |s| s.metrics.total_frames_received == 1).await?;
    assert_eq!(status.metrics.malformed_messages, 1);
    assert_eq!(status.state, ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_binary_is_reported_as_malformed() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let producer = Producer::bind().await?;
    let client = StreamClient::new(producer.config(), TOKEN)?;
    client.connect()?;

    let (mut socket, _) = producer.accept().await?;
    socket.send(Message::Binary(vec![0xff, 0xfe, 0xfd])).await?;
    socket.send(frame(1, false)).await?;

    let status = wait_until(&client, |s| s.metrics.total_frames_received == 1).await?;
    assert_eq!(status.metrics.malformed_messages, 1);
    assert_eq!(status.state, ConnectionState::Connected);
    let error = status.last_error.as_deref().unwrap_or_default();
    assert!(error.contains("not valid UTF-8"), "{error}");
    Ok(())
}
