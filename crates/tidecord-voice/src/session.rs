use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tidecord_models::voice::{
    voice_gateway_url, SelectProtocol, SelectProtocolData, SessionDescription, Speaking,
    SpeakingFlags, VoiceHello, VoiceIdentify, VoiceMessage, VoiceReady, VOICE_OP_CLIENT_DISCONNECT,
    VOICE_OP_HEARTBEAT, VOICE_OP_HEARTBEAT_ACK, VOICE_OP_HELLO, VOICE_OP_IDENTIFY, VOICE_OP_READY,
    VOICE_OP_RESUMED, VOICE_OP_SELECT_PROTOCOL, VOICE_OP_SESSION_DESCRIPTION, VOICE_OP_SPEAKING,
};
use tidecord_models::Snowflake;
use tidecord_util::EventFlag;
use tidecord_ws::{CloseAction, Connection, ConnectionConfig, ConnectionError, ConnectionHandle, Protocol};
use tokio::net::UdpSocket;

use crate::crypto::{EncryptionContext, EncryptionMode};
use crate::discovery::{discover_ip, DEFAULT_DISCOVERY_ATTEMPTS, DEFAULT_DISCOVERY_TIMEOUT};
use crate::packet::PacketSequencer;
use crate::VoiceError;

// Voice close codes
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;
pub const CLOSE_SESSION_INVALID: u16 = 4006;
pub const CLOSE_DISCONNECTED: u16 = 4014;

/// Everything needed to open a voice socket. Assembled from the
/// `VOICE_STATE_UPDATE` and `VOICE_SERVER_UPDATE` gateway events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionInfo {
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
    pub server_id: Snowflake,
    pub user_id: Snowflake,
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub connection: ConnectionConfig,
    pub discovery_attempts: u32,
    pub discovery_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            discovery_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

/// UDP media path of one handshake. Replaced on every reconnect.
struct Transport {
    socket: UdpSocket,
    peer: SocketAddr,
    ssrc: u32,
    sequencer: PacketSequencer,
    crypto: EncryptionContext,
}

/// The voice gateway strategy plugged into the connection engine.
struct VoiceProtocol {
    info: RwLock<VoiceSessionInfo>,
    discovery_attempts: u32,
    discovery_timeout: Duration,
    got_ready: EventFlag,
    ready: Mutex<Option<VoiceReady>>,
    got_description: EventFlag,
    description: Mutex<Option<SessionDescription>>,
    transport: Mutex<Option<Transport>>,
}

fn protocol_error(err: impl Display) -> ConnectionError {
    ConnectionError::Protocol(err.to_string())
}

impl VoiceProtocol {
    async fn run_handshake(&self, conn: &ConnectionHandle) -> Result<(), VoiceError> {
        let info = self.info.read().clone();
        let identify = VoiceIdentify {
            server_id: info.server_id,
            user_id: info.user_id,
            session_id: info.session_id.clone(),
            token: info.token.clone(),
        };
        conn.send_json(&VoiceMessage::new(VOICE_OP_IDENTIFY, &identify)?)?;

        self.got_ready.wait().await;
        let ready = self
            .ready
            .lock()
            .take()
            .ok_or_else(|| VoiceError::Protocol("ready flag set without a payload".into()))?;
        let mode = EncryptionMode::select(&ready.modes)
            .ok_or_else(|| VoiceError::UnsupportedModes(ready.modes.clone()))?;

        let peer = tokio::net::lookup_host((ready.ip.as_str(), ready.port))
            .await?
            .next()
            .ok_or_else(|| VoiceError::Protocol(format!("cannot resolve {}", ready.ip)))?;
        let bind: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        let (address, port) = discover_ip(
            &socket,
            peer,
            ready.ssrc,
            self.discovery_attempts,
            self.discovery_timeout,
        )
        .await?;

        let select = SelectProtocol {
            protocol: "udp".to_string(),
            data: SelectProtocolData {
                address,
                port,
                mode: mode.as_str().to_string(),
            },
        };
        conn.send_json(&VoiceMessage::new(VOICE_OP_SELECT_PROTOCOL, &select)?)?;

        self.got_description.wait().await;
        let description = self
            .description
            .lock()
            .take()
            .ok_or_else(|| VoiceError::Protocol("description flag set without a payload".into()))?;
        // The server has the final say on the mode.
        let mode: EncryptionMode = description.mode.parse()?;
        let crypto = EncryptionContext::new(mode, &description.secret_key)?;

        *self.transport.lock() = Some(Transport {
            socket,
            peer,
            ssrc: ready.ssrc,
            sequencer: PacketSequencer::random(),
            crypto,
        });
        conn.state().ready_to_run.set();
        tracing::info!(
            name = %conn.name(),
            ssrc = ready.ssrc,
            %peer,
            mode = %mode,
            "voice session ready"
        );
        Ok(())
    }
}

impl Protocol for VoiceProtocol {
    type Frame = VoiceMessage;

    fn name(&self) -> &str {
        "voice"
    }

    fn url(&self) -> String {
        voice_gateway_url(&self.info.read().endpoint)
    }

    async fn handshake(&self, conn: ConnectionHandle) -> Result<(), ConnectionError> {
        self.run_handshake(&conn).await.map_err(|err| match err {
            VoiceError::Connection(err) => err,
            other => protocol_error(other),
        })
    }

    async fn dispatch(&self, frame: VoiceMessage, conn: &ConnectionHandle) -> Result<(), ConnectionError> {
        tracing::debug!(name = %conn.name(), op = frame.op, "voice frame");
        match frame.op {
            VOICE_OP_HELLO => {
                let hello: VoiceHello = frame.payload()?;
                let interval = Duration::from_secs_f64(hello.heartbeat_interval.max(1.0) / 1000.0);
                conn.state().start_heartbeat(interval);
            }
            VOICE_OP_READY => {
                let ready: VoiceReady = frame.payload()?;
                *self.ready.lock() = Some(ready);
                self.got_ready.set();
            }
            VOICE_OP_SESSION_DESCRIPTION => {
                let description: SessionDescription = frame.payload()?;
                *self.description.lock() = Some(description);
                self.got_description.set();
            }
            VOICE_OP_HEARTBEAT_ACK => conn.state().heartbeat_ack.set(),
            VOICE_OP_SPEAKING | VOICE_OP_CLIENT_DISCONNECT | VOICE_OP_RESUMED => {}
            other => {
                tracing::debug!(name = %conn.name(), op = other, "unhandled voice opcode");
            }
        }
        Ok(())
    }

    fn heartbeat_payload(&self) -> Result<serde_json::Value, ConnectionError> {
        let nonce = chrono::Utc::now().timestamp_millis();
        Ok(serde_json::to_value(VoiceMessage::new(VOICE_OP_HEARTBEAT, &nonce)?)?)
    }

    fn on_close(&self, code: u16) -> CloseAction {
        match code {
            CLOSE_AUTHENTICATION_FAILED | CLOSE_SESSION_INVALID | CLOSE_DISCONNECTED => {
                tracing::warn!(code, "voice session closed for good");
                CloseAction::Stop
            }
            _ => CloseAction::Reconnect,
        }
    }

    fn cleanup(&self) {
        self.got_ready.clear();
        self.ready.lock().take();
        self.got_description.clear();
        self.description.lock().take();
        self.transport.lock().take();
    }
}

/// Handle to a live voice connection for one guild.
///
/// Cheap to clone. The send path is synchronous so it can be driven from the
/// audio pacing thread.
#[derive(Clone)]
pub struct VoiceSession {
    protocol: Arc<VoiceProtocol>,
    conn: ConnectionHandle,
}

impl VoiceSession {
    /// Start connecting. The handshake (identify, IP discovery, protocol
    /// selection) runs again after every reconnect.
    pub fn connect(info: VoiceSessionInfo, config: VoiceConfig) -> Self {
        let name = format!("voice-{}", info.server_id);
        let protocol = Arc::new(VoiceProtocol {
            info: RwLock::new(info),
            discovery_attempts: config.discovery_attempts,
            discovery_timeout: config.discovery_timeout,
            got_ready: EventFlag::new(),
            ready: Mutex::new(None),
            got_description: EventFlag::new(),
            description: Mutex::new(None),
            transport: Mutex::new(None),
        });
        let conn = ConnectionHandle::new(name);
        Connection::start(protocol.clone(), conn.clone(), config.connection);
        Self { protocol, conn }
    }

    pub fn guild_id(&self) -> Snowflake {
        self.protocol.info.read().server_id
    }

    pub fn info(&self) -> VoiceSessionInfo {
        self.protocol.info.read().clone()
    }

    /// Apply new connection details. A changed endpoint, token or session
    /// forces a fresh handshake.
    pub fn update_info(&self, info: VoiceSessionInfo) {
        let changed = {
            let mut current = self.protocol.info.write();
            let changed = *current != info;
            *current = info;
            changed
        };
        if changed {
            tracing::info!(name = %self.conn.name(), "voice server changed, reconnecting");
            self.conn.reconnect();
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_ready()
    }

    /// The session was stopped and will not come back.
    pub fn is_stopped(&self) -> bool {
        self.conn.is_stopped()
    }

    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.conn.state().ready_to_run.wait_timeout(timeout).await
    }

    pub fn wait_ready_blocking(&self, timeout: Duration) -> bool {
        self.conn.state().ready_to_run.wait_blocking(timeout)
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.protocol.transport.lock().as_ref().map(|t| t.ssrc)
    }

    pub fn encryption_mode(&self) -> Option<EncryptionMode> {
        self.protocol
            .transport
            .lock()
            .as_ref()
            .map(|t| t.crypto.mode())
    }

    /// Encrypt one 20 ms Opus frame and send it. Never blocks: a full socket
    /// buffer drops the frame.
    pub fn send_audio_frame(&self, opus: &[u8]) -> Result<(), VoiceError> {
        let mut guard = self.protocol.transport.lock();
        let transport = guard.as_mut().ok_or(VoiceError::NotReady)?;
        let header = transport.sequencer.next_header(transport.ssrc);
        let packet = transport.crypto.seal(&header, opus)?;
        match transport.socket.try_send_to(&packet, transport.peer) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!(sequence = header.sequence, "socket busy, dropping audio frame");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Tell other clients whether we are transmitting. Failures are logged.
    pub fn speak(&self, flags: SpeakingFlags) {
        let Some(ssrc) = self.ssrc() else {
            tracing::debug!(name = %self.conn.name(), "not speaking: session not ready");
            return;
        };
        let payload = Speaking {
            speaking: flags,
            delay: 0,
            ssrc,
            user_id: None,
        };
        let result = VoiceMessage::new(VOICE_OP_SPEAKING, &payload)
            .map_err(ConnectionError::from)
            .and_then(|msg| self.conn.send_json(&msg));
        if let Err(err) = result {
            tracing::warn!(name = %self.conn.name(), error = %err, "failed to send speaking state");
        }
    }

    /// Close the voice socket for good.
    pub fn disconnect(&self) {
        self.conn.stop();
    }

    pub async fn join(&self) {
        self.conn.join().await;
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("guild_id", &self.guild_id())
            .field("ready", &self.is_ready())
            .finish()
    }
}
