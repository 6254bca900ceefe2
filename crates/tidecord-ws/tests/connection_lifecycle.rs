use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tidecord_util::Backoff;
use tidecord_ws::{
    CloseAction, Connection, ConnectionConfig, ConnectionError, ConnectionHandle, Message,
    Protocol,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::WebSocketStream;

// ── Fake server ─────────────────────────────────────────────────────────────

type ServerSocket = WebSocketStream<TcpStream>;

struct FakeServer {
    url: String,
    accepted: mpsc::UnboundedReceiver<ServerSocket>,
}

impl FakeServer {
    async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let (tx, accepted) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(socket).is_err() {
                        break;
                    }
                }
            }
        });
        Ok(Self { url, accepted })
    }

    async fn next_socket(&mut self) -> anyhow::Result<ServerSocket> {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .context("no connection within 5s")?
            .context("listener closed")
    }

    async fn no_socket_within(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.accepted.recv()).await.is_err()
    }
}

async fn next_json(socket: &mut ServerSocket) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .context("no frame within 5s")?
            .context("socket ended")??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

async fn next_close_code(socket: &mut ServerSocket) -> anyhow::Result<Option<u16>> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .context("no close within 5s")?;
        match msg {
            Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Ok(None),
        }
    }
}

// ── Test protocol ───────────────────────────────────────────────────────────

/// Sends `{"op":"identify"}` on connect, records every frame, starts the
/// heartbeat on `hello` and treats `ack` as the heartbeat acknowledgement.
struct RecordingProtocol {
    url: String,
    frames: Mutex<Vec<Value>>,
    cleanups: Mutex<u32>,
}

impl RecordingProtocol {
    fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            frames: Mutex::new(Vec::new()),
            cleanups: Mutex::new(0),
        })
    }
}

impl Protocol for RecordingProtocol {
    type Frame = Value;

    fn name(&self) -> &str {
        "recording"
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    async fn handshake(&self, conn: ConnectionHandle) -> Result<(), ConnectionError> {
        conn.send_json(&json!({"op": "identify"}))?;
        conn.state().ready_to_run.set();
        Ok(())
    }

    async fn dispatch(&self, frame: Value, conn: &ConnectionHandle) -> Result<(), ConnectionError> {
        match frame["op"].as_str() {
            Some("hello") => {
                let ms = frame["interval"].as_u64().unwrap_or(1000);
                conn.state().start_heartbeat(Duration::from_millis(ms));
            }
            Some("ack") => conn.state().heartbeat_ack.set(),
            Some("boom") => return Err(ConnectionError::Protocol("boom".into())),
            _ => {}
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn heartbeat_payload(&self) -> Result<Value, ConnectionError> {
        Ok(json!({"op": "heartbeat"}))
    }

    fn on_close(&self, code: u16) -> CloseAction {
        if code == 4004 {
            CloseAction::Stop
        } else {
            CloseAction::Reconnect
        }
    }

    fn cleanup(&self) {
        *self.cleanups.lock() += 1;
    }
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
        recv_poll: Duration::from_millis(50),
        close_timeout: Duration::from_millis(500),
        backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(20)),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn frames_dispatch_in_order_and_errors_do_not_kill_the_loop() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol.clone(), fast_config());

    let mut socket = server.next_socket().await?;
    assert_eq!(next_json(&mut socket).await?, json!({"op": "identify"}));

    socket.send(Message::text(r#"{"op":"n","i":1}"#)).await?;
    socket.send(Message::text("not json")).await?;
    socket.send(Message::text(r#"{"op":"boom"}"#)).await?;
    socket.send(Message::text(r#"{"op":"n","i":2}"#)).await?;
    socket.send(Message::binary(br#"{"op":"n","i":3}"#.to_vec())).await?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while protocol.frames.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("frames were not dispatched")?;

    let seen: Vec<i64> = protocol
        .frames
        .lock()
        .iter()
        .filter_map(|f| f["i"].as_i64())
        .collect();
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(conn.is_ready());

    conn.stop();
    assert_eq!(next_close_code(&mut socket).await?, Some(1000));
    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    assert!(server.no_socket_within(Duration::from_millis(200)).await);
    Ok(())
}

#[tokio::test]
async fn missing_heartbeat_ack_reconnects_once() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol.clone(), fast_config());

    let mut first = server.next_socket().await?;
    next_json(&mut first).await?;
    first
        .send(Message::text(r#"{"op":"hello","interval":150}"#))
        .await?;
    assert_eq!(next_json(&mut first).await?, json!({"op": "heartbeat"}));

    // No ack: the client gives up on this socket after one interval.
    assert_eq!(next_close_code(&mut first).await?, Some(4000));

    let mut second = server.next_socket().await?;
    assert_eq!(next_json(&mut second).await?, json!({"op": "identify"}));
    assert!(*protocol.cleanups.lock() >= 1);

    // Without a new hello the heartbeat stays parked, so no further reconnect.
    assert!(server.no_socket_within(Duration::from_millis(400)).await);

    conn.stop();
    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn stale_heartbeat_deadline_does_not_close_the_replacement_socket() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol.clone(), fast_config());

    let mut first = server.next_socket().await?;
    next_json(&mut first).await?;
    first
        .send(Message::text(r#"{"op":"hello","interval":800}"#))
        .await?;
    assert_eq!(next_json(&mut first).await?, json!({"op": "heartbeat"}));

    // Server drops the socket mid-interval, before acknowledging.
    first
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: Utf8Bytes::from_static("going away"),
        })))
        .await?;

    let mut second = server.next_socket().await?;
    assert_eq!(next_json(&mut second).await?, json!({"op": "identify"}));
    second
        .send(Message::text(r#"{"op":"hello","interval":800}"#))
        .await?;

    // The replacement gets its own first heartbeat and, acked, stays up well
    // past the first socket's old deadline.
    let healthy_until = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut heartbeats = 0;
    loop {
        let remaining = healthy_until.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, second.next()).await {
            Err(_) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str())?;
                if frame == json!({"op": "heartbeat"}) {
                    heartbeats += 1;
                    second.send(Message::text(r#"{"op":"ack"}"#)).await?;
                }
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                anyhow::bail!("replacement socket closed by client: {frame:?}");
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(err))) => return Err(err.into()),
            Ok(None) => anyhow::bail!("replacement socket ended"),
        }
    }
    assert!(heartbeats >= 2, "only {heartbeats} heartbeats on the replacement socket");
    assert!(server.no_socket_within(Duration::from_millis(50)).await);

    conn.stop();
    assert_eq!(next_close_code(&mut second).await?, Some(1000));
    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn acknowledged_heartbeats_keep_the_socket() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol.clone(), fast_config());

    let mut socket = server.next_socket().await?;
    next_json(&mut socket).await?;
    socket
        .send(Message::text(r#"{"op":"hello","interval":100}"#))
        .await?;
    for _ in 0..3 {
        assert_eq!(next_json(&mut socket).await?, json!({"op": "heartbeat"}));
        socket.send(Message::text(r#"{"op":"ack"}"#)).await?;
    }
    assert!(server.no_socket_within(Duration::from_millis(50)).await);

    conn.stop();
    assert_eq!(next_close_code(&mut socket).await?, Some(1000));
    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn fatal_close_code_stops_without_reconnecting() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol, fast_config());

    let mut socket = server.next_socket().await?;
    next_json(&mut socket).await?;
    socket
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4004),
            reason: Utf8Bytes::from_static("authentication failed"),
        })))
        .await?;

    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    assert!(conn.is_stopped());
    assert!(server.no_socket_within(Duration::from_millis(200)).await);
    Ok(())
}

#[tokio::test]
async fn peer_close_with_resumable_code_reconnects() -> anyhow::Result<()> {
    let mut server = FakeServer::start().await?;
    let protocol = RecordingProtocol::new(&server.url);
    let conn = Connection::spawn(protocol, fast_config());

    let mut socket = server.next_socket().await?;
    next_json(&mut socket).await?;
    socket
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: Utf8Bytes::from_static("unknown error"),
        })))
        .await?;

    let mut again = server.next_socket().await?;
    assert_eq!(next_json(&mut again).await?, json!({"op": "identify"}));

    conn.stop();
    assert!(conn.join_timeout(Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn send_without_socket_reports_not_connected() {
    let handle = ConnectionHandle::new("idle");
    assert!(matches!(
        handle.send_json(&json!({"op": 1})),
        Err(ConnectionError::NotConnected)
    ));
    assert!(!handle.is_ready());
}
