use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::member::Member;
use crate::role::Role;
use crate::voice::VoiceState;
use crate::Snowflake;

/// A guild as delivered by `GUILD_CREATE` / `GUILD_UPDATE` or the REST API.
///
/// The collection fields are only populated on `GUILD_CREATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub system_channel_id: Option<Snowflake>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

/// `GUILD_DELETE` payload. `unavailable` set means an outage, not a removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildDelete {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// `GUILD_ROLE_CREATE` / `GUILD_ROLE_UPDATE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleEvent {
    pub guild_id: Snowflake,
    pub role: Role,
}

/// `GUILD_ROLE_DELETE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}
