use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::intents::Intents;
use crate::user::User;
use crate::Snowflake;

// Client -> Server opcodes
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_PRESENCE_UPDATE: u8 = 3;
pub const OP_VOICE_STATE_UPDATE: u8 = 4;
pub const OP_RESUME: u8 = 6;
pub const OP_REQUEST_GUILD_MEMBERS: u8 = 8;

// Server -> Client opcodes
pub const OP_DISPATCH: u8 = 0;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const GATEWAY_VERSION: u8 = 10;
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// The envelope every gateway frame travels in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayMessage {
    pub fn new<T: Serialize>(op: u8, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            d: Some(serde_json::to_value(payload)?),
            s: None,
            t: None,
        })
    }

    /// Decode the `d` field into a typed payload. A missing `d` decodes as JSON `null`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.d {
            Some(d) => T::deserialize(d),
            None => T::deserialize(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Milliseconds.
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl ConnectionProperties {
    pub fn for_library(name: &str) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: name.to_string(),
            device: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub intents: Intents,
    pub properties: ConnectionProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialApplication {
    pub id: Snowflake,
    #[serde(default)]
    pub flags: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    #[serde(default)]
    pub v: u8,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub application: Option<PartialApplication>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix time (ms) the client went idle, if it is idle.
    pub since: Option<u64>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    pub status: String,
    #[serde(default)]
    pub afk: bool,
}

impl PresenceUpdate {
    pub fn online() -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: "online".to_string(),
            afk: false,
        }
    }
}

/// Op 4 payload: join, move between, or leave voice channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdateRequest {
    pub guild_id: Snowflake,
    /// `None` disconnects from voice in the guild.
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(default)]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Response of `GET /gateway/bot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    #[serde(default)]
    pub shards: u32,
}

// Dispatch event names
pub const EVENT_READY: &str = "READY";
pub const EVENT_RESUMED: &str = "RESUMED";

// Guild events
pub const EVENT_GUILD_CREATE: &str = "GUILD_CREATE";
pub const EVENT_GUILD_UPDATE: &str = "GUILD_UPDATE";
pub const EVENT_GUILD_DELETE: &str = "GUILD_DELETE";
pub const EVENT_GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
pub const EVENT_GUILD_MEMBER_REMOVE: &str = "GUILD_MEMBER_REMOVE";
pub const EVENT_GUILD_MEMBER_UPDATE: &str = "GUILD_MEMBER_UPDATE";
pub const EVENT_GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";
pub const EVENT_GUILD_ROLE_CREATE: &str = "GUILD_ROLE_CREATE";
pub const EVENT_GUILD_ROLE_UPDATE: &str = "GUILD_ROLE_UPDATE";
pub const EVENT_GUILD_ROLE_DELETE: &str = "GUILD_ROLE_DELETE";

// Channel events
pub const EVENT_CHANNEL_CREATE: &str = "CHANNEL_CREATE";
pub const EVENT_CHANNEL_UPDATE: &str = "CHANNEL_UPDATE";
pub const EVENT_CHANNEL_DELETE: &str = "CHANNEL_DELETE";

// Message events
pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";
pub const EVENT_MESSAGE_UPDATE: &str = "MESSAGE_UPDATE";
pub const EVENT_MESSAGE_DELETE: &str = "MESSAGE_DELETE";

// Voice events
pub const EVENT_VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
pub const EVENT_VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_dispatch() {
        let raw = r#"{"op":0,"s":42,"t":"READY","d":{"v":10,"user":{"id":"1","username":"bot"},"guilds":[{"id":"2","unavailable":true}],"session_id":"abc"}}"#;
        let msg: GatewayMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.op, OP_DISPATCH);
        assert_eq!(msg.s, Some(42));
        assert_eq!(msg.t.as_deref(), Some(EVENT_READY));

        let ready: Ready = msg.payload().unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.guilds.len(), 1);
        assert!(ready.guilds[0].unavailable);
    }

    #[test]
    fn envelope_tolerates_null_fields() {
        let msg: GatewayMessage =
            serde_json::from_str(r#"{"op":11,"d":null,"s":null,"t":null}"#).unwrap();
        assert_eq!(msg.op, OP_HEARTBEAT_ACK);
        assert!(msg.d.is_none());
        assert!(msg.s.is_none());
        // op 9 with a missing `d` reads as "not resumable".
        let invalid: GatewayMessage = serde_json::from_str(r#"{"op":9}"#).unwrap();
        assert_eq!(invalid.payload::<Option<bool>>().unwrap(), None);
    }

    #[test]
    fn resume_serializes_expected_shape() {
        let msg = GatewayMessage::new(
            OP_RESUME,
            &Resume {
                token: "t".into(),
                session_id: "abc".into(),
                seq: 42,
            },
        )
        .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": 6, "d": {"token": "t", "session_id": "abc", "seq": 42}})
        );
    }
}
