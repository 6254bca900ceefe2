use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::member::Member;
use crate::Snowflake;

// Voice gateway opcodes
pub const VOICE_OP_IDENTIFY: u8 = 0;
pub const VOICE_OP_SELECT_PROTOCOL: u8 = 1;
pub const VOICE_OP_READY: u8 = 2;
pub const VOICE_OP_HEARTBEAT: u8 = 3;
pub const VOICE_OP_SESSION_DESCRIPTION: u8 = 4;
pub const VOICE_OP_SPEAKING: u8 = 5;
pub const VOICE_OP_HEARTBEAT_ACK: u8 = 6;
pub const VOICE_OP_RESUME: u8 = 7;
pub const VOICE_OP_HELLO: u8 = 8;
pub const VOICE_OP_RESUMED: u8 = 9;
pub const VOICE_OP_CLIENT_DISCONNECT: u8 = 13;

pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Build the voice WebSocket URL for an endpoint from `VOICE_SERVER_UPDATE`.
///
/// Endpoints arrive without a scheme; an explicit `ws://` is kept for local servers.
pub fn voice_gateway_url(endpoint: &str) -> String {
    let (scheme, host) = match endpoint.strip_prefix("ws://") {
        Some(host) => ("ws", host),
        None => ("wss", endpoint.trim_start_matches("wss://")),
    };
    let host = host.trim_end_matches('/');
    format!("{scheme}://{host}/?v={VOICE_GATEWAY_VERSION}")
}

/// Voice gateway envelope. Voice v4 frames carry no sequence or event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
}

impl VoiceMessage {
    pub fn new<T: Serialize>(op: u8, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            d: Some(serde_json::to_value(payload)?),
        })
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.d {
            Some(d) => T::deserialize(d),
            None => T::deserialize(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceIdentify {
    pub server_id: Snowflake,
    pub user_id: Snowflake,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceHello {
    /// Milliseconds; the voice gateway sends a float.
    pub heartbeat_interval: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReady {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpeakingFlags: u32 {
        const MICROPHONE = 1 << 0;
        const SOUNDSHARE = 1 << 1;
        const PRIORITY   = 1 << 2;
    }
}

impl Serialize for SpeakingFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for SpeakingFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(SpeakingFlags::from_bits_truncate(bits))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
    pub speaking: SpeakingFlags,
    #[serde(default)]
    pub delay: u32,
    pub ssrc: u32,
    /// Only set on speaking updates received about other users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDisconnect {
    pub user_id: Snowflake,
}

/// `VOICE_STATE_UPDATE` dispatch payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub user_id: Snowflake,
    #[serde(default)]
    pub member: Option<Member>,
    pub session_id: String,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_stream: bool,
    #[serde(default)]
    pub self_video: bool,
    #[serde(default)]
    pub suppress: bool,
}

/// `VOICE_SERVER_UPDATE` dispatch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: Snowflake,
    /// `None` while the voice server is being reallocated.
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_and_description_decode() {
        let ready: VoiceMessage = serde_json::from_str(
            r#"{"op":2,"d":{"ssrc":1,"ip":"127.0.0.1","port":1234,"modes":["xsalsa20_poly1305"],"heartbeat_interval":1}}"#,
        )
        .unwrap();
        let ready: VoiceReady = ready.payload().unwrap();
        assert_eq!(ready.port, 1234);
        assert_eq!(ready.modes, vec!["xsalsa20_poly1305".to_string()]);

        let desc: SessionDescription =
            serde_json::from_str(r#"{"mode":"xsalsa20_poly1305","secret_key":[1,2,3]}"#).unwrap();
        assert_eq!(desc.secret_key, vec![1, 2, 3]);
    }

    #[test]
    fn speaking_serializes_flag_bits() {
        let msg = VoiceMessage::new(
            VOICE_OP_SPEAKING,
            &Speaking {
                speaking: SpeakingFlags::MICROPHONE,
                delay: 0,
                ssrc: 7,
                user_id: None,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"op": 5, "d": {"speaking": 1, "delay": 0, "ssrc": 7}})
        );
    }

    #[test]
    fn gateway_url_strips_scheme_and_port_is_kept() {
        assert_eq!(
            voice_gateway_url("us-east1.example.gg:443"),
            "wss://us-east1.example.gg:443/?v=4"
        );
        assert_eq!(voice_gateway_url("wss://voice.example.gg/"), "wss://voice.example.gg/?v=4");
        assert_eq!(voice_gateway_url("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000/?v=4");
    }
}
