use serde::{Deserialize, Serialize};

use crate::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    Text,
    DM,
    Voice,
    GroupDM,
    Category,
    Announcement,
    StageVoice,
    Forum,
    Other(u8),
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            1 => Self::DM,
            2 => Self::Voice,
            3 => Self::GroupDM,
            4 => Self::Category,
            5 => Self::Announcement,
            13 => Self::StageVoice,
            15 => Self::Forum,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(value: ChannelType) -> Self {
        match value {
            ChannelType::Text => 0,
            ChannelType::DM => 1,
            ChannelType::Voice => 2,
            ChannelType::GroupDM => 3,
            ChannelType::Category => 4,
            ChannelType::Announcement => 5,
            ChannelType::StageVoice => 13,
            ChannelType::Forum => 15,
            ChannelType::Other(other) => other,
        }
    }
}

impl ChannelType {
    pub fn is_voice(self) -> bool {
        matches!(self, Self::Voice | Self::StageVoice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
}
