use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::User;
use crate::Snowflake;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Absent only in member objects embedded in message events.
    #[serde(default)]
    pub user: Option<User>,
    /// Present on `GUILD_MEMBER_*` events, absent inside a guild payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl Member {
    pub fn user_id(&self) -> Option<Snowflake> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// `GUILD_MEMBER_REMOVE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRemove {
    pub guild_id: Snowflake,
    pub user: User,
}

/// `GUILD_MEMBERS_CHUNK` payload (response to op 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersChunk {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default)]
    pub nonce: Option<String>,
}
