use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tidecord_util::EventFlag;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    CloseAction, ConnectionConfig, ConnectionError, ConnectionState, Protocol, CLOSE_ABNORMAL,
    CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_RECONNECT,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Shared {
    name: String,
    state: ConnectionState,
    /// Writer queue of the socket currently open, if any.
    outbox: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Set to abandon the current socket; cleared before every connect.
    kill: EventFlag,
    /// Set once the outer loop has exited for good.
    finished: EventFlag,
}

/// Cheap, cloneable handle to a running (or about to run) connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Create a handle before the connection starts, so the protocol can
    /// keep one for its own outbound operations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: ConnectionState::new(),
                outbox: Mutex::new(None),
                kill: EventFlag::new(),
                finished: EventFlag::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> &ConnectionState {
        &self.shared.state
    }

    /// Whether the handshake completed on the current socket.
    pub fn is_ready(&self) -> bool {
        self.shared.state.ready_to_run.is_set()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.stop_requested.is_set()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.is_set()
    }

    /// Queue a frame on the current socket. Never blocks.
    pub fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let outbox = self.shared.outbox.lock();
        let tx = outbox.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(message).map_err(|_| ConnectionError::NotConnected)
    }

    pub fn send_json<T: Serialize>(&self, payload: &T) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(payload)?;
        tracing::debug!(name = %self.shared.name, payload = %text, "sending frame");
        self.send(Message::text(text))
    }

    /// Drop the current socket and let the engine reconnect.
    pub fn reconnect(&self) {
        self.close_socket(CLOSE_RECONNECT, "reconnecting");
    }

    /// Like [`reconnect`](Self::reconnect) with an explicit close code.
    pub fn reconnect_with(&self, code: u16) {
        self.close_socket(code, "reconnecting");
    }

    /// Request a terminal stop: close the socket and never reconnect.
    pub fn stop(&self) {
        self.stop_with(CLOSE_NORMAL);
    }

    pub fn stop_with(&self, code: u16) {
        tracing::info!(name = %self.shared.name, code, "stop requested");
        self.shared.state.stop_requested.set();
        self.close_socket(code, "stopping");
    }

    /// Wait until the connection's outer loop has exited.
    pub async fn join(&self) {
        self.shared.finished.wait().await;
    }

    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        self.shared.finished.wait_timeout(timeout).await
    }

    fn close_socket(&self, code: u16, reason: &'static str) {
        // The heartbeat task must not fire on a socket that is going away.
        self.shared.state.ready_to_run.clear();
        self.shared.state.heartbeat_ready.clear();
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from_static(reason),
        };
        let _ = self.send(Message::Close(Some(frame)));
        self.shared.kill.set();
    }

    fn install_outbox(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.shared.outbox.lock() = Some(tx);
    }

    fn take_outbox(&self) {
        self.shared.outbox.lock().take();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.shared.name)
            .field("ready", &self.is_ready())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Entry points for running a [`Protocol`] over a reconnecting socket.
pub struct Connection;

impl Connection {
    /// Spawn the connection with a fresh handle named after the protocol.
    pub fn spawn<P: Protocol>(protocol: Arc<P>, config: ConnectionConfig) -> ConnectionHandle {
        let handle = ConnectionHandle::new(protocol.name());
        Self::start(protocol, handle.clone(), config);
        handle
    }

    /// Spawn the connection on a handle created earlier with [`ConnectionHandle::new`].
    pub fn start<P: Protocol>(protocol: Arc<P>, handle: ConnectionHandle, config: ConnectionConfig) {
        tokio::spawn(run(protocol, handle, config));
    }
}

async fn run<P: Protocol>(protocol: Arc<P>, conn: ConnectionHandle, config: ConnectionConfig) {
    let name = conn.name().to_string();
    let state = conn.state();
    tracing::debug!(name = %name, "starting heartbeat task");
    let heartbeat = tokio::spawn(heartbeat_loop(protocol.clone(), conn.clone()));

    loop {
        if state.stop_requested.is_set() {
            break;
        }
        conn.shared.kill.clear();

        let url = protocol.url();
        tracing::debug!(name = %name, url = %url, "connecting");
        let action = match tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((socket, _response))) => {
                tracing::info!(name = %name, "connected");
                run_socket(&protocol, &conn, &config, socket).await
            }
            Ok(Err(err)) => {
                tracing::warn!(name = %name, error = %err, "failed to connect");
                CloseAction::Reconnect
            }
            Err(_) => {
                let err = ConnectionError::ConnectTimeout(config.connect_timeout);
                tracing::warn!(name = %name, error = %err, "failed to connect");
                CloseAction::Reconnect
            }
        };

        state.end_socket();
        if std::panic::catch_unwind(AssertUnwindSafe(|| protocol.cleanup())).is_err() {
            tracing::error!(name = %name, "cleanup panicked");
        }

        if action == CloseAction::Stop || state.stop_requested.is_set() {
            break;
        }

        let delay = config.backoff.next_delay();
        tracing::warn!(name = %name, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = state.stop_requested.wait() => break,
        }
    }

    tracing::debug!(name = %name, "stopping connection");
    state.stop_requested.set();
    let _ = heartbeat.await;
    conn.shared.finished.set();
}

async fn run_socket<P: Protocol>(
    protocol: &Arc<P>,
    conn: &ConnectionHandle,
    config: &ConnectionConfig,
    socket: Socket,
) -> CloseAction {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    conn.install_outbox(tx);
    let writer = tokio::spawn(write_loop(conn.name().to_string(), sink, rx));

    // A stop may have landed while we were connecting.
    if conn.is_stopped() {
        conn.stop();
    }

    let handshake = {
        let protocol = protocol.clone();
        let conn = conn.clone();
        let timeout = config.handshake_timeout;
        tokio::spawn(async move {
            tracing::debug!(name = %conn.name(), "starting handshake");
            match tokio::time::timeout(timeout, protocol.handshake(conn.clone())).await {
                Ok(Ok(())) => tracing::debug!(name = %conn.name(), "handshake complete"),
                Ok(Err(err)) => {
                    tracing::warn!(name = %conn.name(), error = %err, "handshake failed");
                    conn.reconnect();
                }
                Err(_) => {
                    tracing::warn!(
                        name = %conn.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "handshake timed out"
                    );
                    conn.reconnect();
                }
            }
        })
    };

    let action = receive_loop(protocol, conn, config, &mut stream).await;
    tracing::warn!(name = %conn.name(), "connection is lost");

    handshake.abort();
    conn.take_outbox();
    if tokio::time::timeout(config.close_timeout, writer).await.is_err() {
        tracing::debug!(name = %conn.name(), "writer did not flush before close timeout");
    }
    action
}

async fn receive_loop<P: Protocol>(
    protocol: &Arc<P>,
    conn: &ConnectionHandle,
    config: &ConnectionConfig,
    stream: &mut SplitStream<Socket>,
) -> CloseAction {
    let name = conn.name();
    let state = conn.state();
    let local_close = || {
        if state.stop_requested.is_set() {
            CloseAction::Stop
        } else {
            CloseAction::Reconnect
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            () = conn.shared.kill.wait() => return local_close(),
            next = tokio::time::timeout(config.recv_poll, stream.next()) => next,
        };

        let message = match next {
            Err(_elapsed) => {
                if state.stop_requested.is_set() {
                    return CloseAction::Stop;
                }
                continue;
            }
            Ok(None) => {
                tracing::warn!(name = %name, "socket ended without a close frame");
                return if state.stop_requested.is_set() {
                    CloseAction::Stop
                } else {
                    protocol.on_close(CLOSE_ABNORMAL)
                };
            }
            Ok(Some(Err(err))) => {
                tracing::warn!(name = %name, error = %err, "socket receive failed");
                return if state.stop_requested.is_set() {
                    CloseAction::Stop
                } else {
                    protocol.on_close(CLOSE_ABNORMAL)
                };
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => handle_text(protocol, conn, text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_text(protocol, conn, text).await,
                Err(_) => {
                    tracing::warn!(name = %name, len = bytes.len(), "ignoring non-UTF-8 binary frame");
                }
            },
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                tracing::info!(name = %name, code, reason = %reason, "socket closed by peer");
                if state.stop_requested.is_set() {
                    return CloseAction::Stop;
                }
                return protocol.on_close(code);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

async fn handle_text<P: Protocol>(protocol: &Arc<P>, conn: &ConnectionHandle, text: &str) {
    if text.is_empty() {
        return;
    }
    tracing::debug!(name = %conn.name(), payload = %text, "received frame");
    let frame = match serde_json::from_str::<P::Frame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(name = %conn.name(), error = %err, payload = %text, "invalid JSON frame");
            return;
        }
    };

    match AssertUnwindSafe(protocol.dispatch(frame, conn))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(name = %conn.name(), error = %err, "frame handler failed");
        }
        Err(_) => {
            tracing::error!(name = %conn.name(), "frame handler panicked");
        }
    }
}

async fn write_loop(
    name: String,
    mut sink: SplitSink<Socket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = message.is_close();
        if let Err(err) = sink.send(message).await {
            tracing::debug!(name = %name, error = %err, "socket write failed");
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Runs for the lifetime of the connection, across sockets.
///
/// Each round waits for the current socket's heartbeat interval, sends a
/// heartbeat, and expects the acknowledgement before the next deadline.
/// Deadlines are measured from the send instant so time spent sending does
/// not stretch the cadence. A round is abandoned as soon as the socket it
/// belongs to goes away, and a missed ack only ever closes that socket.
async fn heartbeat_loop<P: Protocol>(protocol: Arc<P>, conn: ConnectionHandle) {
    let state = conn.state();
    loop {
        tokio::select! {
            () = state.stop_requested.wait() => break,
            () = state.heartbeat_ready.wait() => {}
        }
        let generation = state.socket_generation();
        if !state.heartbeat_ready.is_set() {
            continue;
        }
        let Some(interval) = state.heartbeat_interval() else {
            tracing::warn!(name = %conn.name(), "heartbeat released without an interval");
            state.heartbeat_ready.clear();
            continue;
        };

        let deadline = Instant::now() + interval;
        state.heartbeat_ack.clear();
        match protocol.heartbeat_payload() {
            Ok(payload) => {
                tracing::debug!(name = %conn.name(), generation, "sending heartbeat");
                if let Err(err) = conn.send_json(&payload) {
                    tracing::debug!(name = %conn.name(), error = %err, "heartbeat not sent");
                }
            }
            Err(err) => {
                tracing::error!(name = %conn.name(), error = %err, "failed to build heartbeat");
            }
        }

        let acked = tokio::select! {
            () = state.stop_requested.wait() => break,
            () = state.socket_gone(generation) => continue,
            acked = state.heartbeat_ack.wait_until(deadline) => acked,
        };
        if !acked {
            if state.socket_generation() == generation && state.heartbeat_ready.is_set() {
                tracing::warn!(
                    name = %conn.name(),
                    interval_ms = interval.as_millis() as u64,
                    "no heartbeat ack within interval, reconnecting"
                );
                conn.reconnect();
            }
            continue;
        }

        tokio::select! {
            () = state.stop_requested.wait() => break,
            () = state.socket_gone(generation) => {}
            () = tokio::time::sleep_until(deadline) => {}
        }
    }
    tracing::debug!(name = %conn.name(), "heartbeat task exiting");
}
