use dashmap::DashMap;
use tidecord_models::Snowflake;
use tidecord_voice::VoiceSessionInfo;

#[derive(Debug, Default, Clone)]
struct PendingVoice {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
}

/// Correlates our own `VOICE_STATE_UPDATE` and `VOICE_SERVER_UPDATE` events
/// per guild. They arrive in either order; connection details are handed out
/// only once both have been seen.
///
/// Records are kept after completion so a later server move (a new
/// `VOICE_SERVER_UPDATE`) yields updated details straight away.
#[derive(Debug, Default)]
pub struct VoiceLink {
    pending: DashMap<Snowflake, PendingVoice>,
}

impl VoiceLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_update(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        session_id: String,
    ) -> Option<VoiceSessionInfo> {
        let mut entry = self.pending.entry(guild_id).or_default();
        entry.session_id = Some(session_id);
        complete(&entry, guild_id, user_id)
    }

    pub fn server_update(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        token: String,
        endpoint: String,
    ) -> Option<VoiceSessionInfo> {
        let mut entry = self.pending.entry(guild_id).or_default();
        entry.token = Some(token);
        entry.endpoint = Some(endpoint);
        complete(&entry, guild_id, user_id)
    }

    pub fn forget(&self, guild_id: Snowflake) {
        self.pending.remove(&guild_id);
    }

    pub fn clear(&self) {
        self.pending.clear();
    }
}

fn complete(pending: &PendingVoice, guild_id: Snowflake, user_id: Snowflake) -> Option<VoiceSessionInfo> {
    Some(VoiceSessionInfo {
        endpoint: pending.endpoint.clone()?,
        token: pending.token.clone()?,
        session_id: pending.session_id.clone()?,
        server_id: guild_id,
        user_id,
    })
}
