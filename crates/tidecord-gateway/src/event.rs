use serde_json::Value;
use tidecord_models::channel::Channel;
use tidecord_models::gateway::*;
use tidecord_models::guild::{Guild, GuildDelete, GuildRoleDelete, GuildRoleEvent};
use tidecord_models::member::{Member, MemberRemove, MembersChunk};
use tidecord_models::message::{Message, MessageDelete};
use tidecord_models::voice::{VoiceServerUpdate, VoiceState};

/// A decoded dispatch (op 0) event.
///
/// Events the client does not model arrive as [`Event::Unknown`] with their
/// raw payload.
#[derive(Debug, Clone)]
pub enum Event {
    Ready(Box<Ready>),
    Resumed,
    GuildCreate(Box<Guild>),
    GuildUpdate(Box<Guild>),
    GuildDelete(GuildDelete),
    GuildMemberAdd(Box<Member>),
    GuildMemberUpdate(Box<Member>),
    GuildMemberRemove(MemberRemove),
    GuildMembersChunk(MembersChunk),
    GuildRoleCreate(GuildRoleEvent),
    GuildRoleUpdate(GuildRoleEvent),
    GuildRoleDelete(GuildRoleDelete),
    ChannelCreate(Box<Channel>),
    ChannelUpdate(Box<Channel>),
    ChannelDelete(Box<Channel>),
    MessageCreate(Box<Message>),
    /// Partial message; only `id` and `channel_id` are guaranteed.
    MessageUpdate(Value),
    MessageDelete(MessageDelete),
    VoiceStateUpdate(Box<VoiceState>),
    VoiceServerUpdate(VoiceServerUpdate),
    Unknown { name: String, data: Value },
}

impl Event {
    /// Decode a dispatch payload by event name. Names are matched
    /// case-insensitively.
    pub fn from_dispatch(name: &str, data: Value) -> Result<Self, serde_json::Error> {
        let name = name.to_ascii_uppercase();
        let event = match name.as_str() {
            EVENT_READY => Self::Ready(serde_json::from_value(data)?),
            EVENT_RESUMED => Self::Resumed,
            EVENT_GUILD_CREATE => Self::GuildCreate(serde_json::from_value(data)?),
            EVENT_GUILD_UPDATE => Self::GuildUpdate(serde_json::from_value(data)?),
            EVENT_GUILD_DELETE => Self::GuildDelete(serde_json::from_value(data)?),
            EVENT_GUILD_MEMBER_ADD => Self::GuildMemberAdd(serde_json::from_value(data)?),
            EVENT_GUILD_MEMBER_UPDATE => Self::GuildMemberUpdate(serde_json::from_value(data)?),
            EVENT_GUILD_MEMBER_REMOVE => Self::GuildMemberRemove(serde_json::from_value(data)?),
            EVENT_GUILD_MEMBERS_CHUNK => Self::GuildMembersChunk(serde_json::from_value(data)?),
            EVENT_GUILD_ROLE_CREATE => Self::GuildRoleCreate(serde_json::from_value(data)?),
            EVENT_GUILD_ROLE_UPDATE => Self::GuildRoleUpdate(serde_json::from_value(data)?),
            EVENT_GUILD_ROLE_DELETE => Self::GuildRoleDelete(serde_json::from_value(data)?),
            EVENT_CHANNEL_CREATE => Self::ChannelCreate(serde_json::from_value(data)?),
            EVENT_CHANNEL_UPDATE => Self::ChannelUpdate(serde_json::from_value(data)?),
            EVENT_CHANNEL_DELETE => Self::ChannelDelete(serde_json::from_value(data)?),
            EVENT_MESSAGE_CREATE => Self::MessageCreate(serde_json::from_value(data)?),
            EVENT_MESSAGE_UPDATE => Self::MessageUpdate(data),
            EVENT_MESSAGE_DELETE => Self::MessageDelete(serde_json::from_value(data)?),
            EVENT_VOICE_STATE_UPDATE => Self::VoiceStateUpdate(serde_json::from_value(data)?),
            EVENT_VOICE_SERVER_UPDATE => Self::VoiceServerUpdate(serde_json::from_value(data)?),
            _ => Self::Unknown { name, data },
        };
        Ok(event)
    }

    /// The upper-case dispatch name this event was decoded from.
    pub fn name(&self) -> &str {
        match self {
            Self::Ready(_) => EVENT_READY,
            Self::Resumed => EVENT_RESUMED,
            Self::GuildCreate(_) => EVENT_GUILD_CREATE,
            Self::GuildUpdate(_) => EVENT_GUILD_UPDATE,
            Self::GuildDelete(_) => EVENT_GUILD_DELETE,
            Self::GuildMemberAdd(_) => EVENT_GUILD_MEMBER_ADD,
            Self::GuildMemberUpdate(_) => EVENT_GUILD_MEMBER_UPDATE,
            Self::GuildMemberRemove(_) => EVENT_GUILD_MEMBER_REMOVE,
            Self::GuildMembersChunk(_) => EVENT_GUILD_MEMBERS_CHUNK,
            Self::GuildRoleCreate(_) => EVENT_GUILD_ROLE_CREATE,
            Self::GuildRoleUpdate(_) => EVENT_GUILD_ROLE_UPDATE,
            Self::GuildRoleDelete(_) => EVENT_GUILD_ROLE_DELETE,
            Self::ChannelCreate(_) => EVENT_CHANNEL_CREATE,
            Self::ChannelUpdate(_) => EVENT_CHANNEL_UPDATE,
            Self::ChannelDelete(_) => EVENT_CHANNEL_DELETE,
            Self::MessageCreate(_) => EVENT_MESSAGE_CREATE,
            Self::MessageUpdate(_) => EVENT_MESSAGE_UPDATE,
            Self::MessageDelete(_) => EVENT_MESSAGE_DELETE,
            Self::VoiceStateUpdate(_) => EVENT_VOICE_STATE_UPDATE,
            Self::VoiceServerUpdate(_) => EVENT_VOICE_SERVER_UPDATE,
            Self::Unknown { name, .. } => name,
        }
    }
}
