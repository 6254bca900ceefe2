use dashmap::DashMap;
use tidecord_models::Snowflake;

use crate::{VoiceConfig, VoiceSession, VoiceSessionInfo};

/// Live voice sessions keyed by guild id.
///
/// The gateway creates or updates entries as voice details arrive; audio
/// players look their session up here again whenever the one they hold has
/// been replaced.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    sessions: DashMap<Snowflake, VoiceSession>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: Snowflake) -> Option<VoiceSession> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, guild_id: Snowflake) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Reuse the live session for the guild when there is one, otherwise
    /// start a new one. A stopped session is replaced.
    pub fn connect_or_update(&self, info: VoiceSessionInfo, config: &VoiceConfig) -> VoiceSession {
        let guild_id = info.server_id;
        let mut entry = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| VoiceSession::connect(info.clone(), config.clone()));
        if entry.is_stopped() {
            tracing::info!(%guild_id, "replacing stopped voice session");
            *entry = VoiceSession::connect(info, config.clone());
        } else {
            entry.update_info(info);
        }
        entry.value().clone()
    }

    pub fn insert(&self, session: VoiceSession) -> Option<VoiceSession> {
        self.sessions.insert(session.guild_id(), session)
    }

    /// Remove and disconnect the guild's session.
    pub fn remove(&self, guild_id: Snowflake) -> Option<VoiceSession> {
        let (_, session) = self.sessions.remove(&guild_id)?;
        session.disconnect();
        Some(session)
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Disconnect every session.
    pub fn clear(&self) {
        for guild_id in self.guild_ids() {
            self.remove(guild_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(endpoint: &str) -> VoiceSessionInfo {
        VoiceSessionInfo {
            endpoint: endpoint.to_string(),
            token: "token".into(),
            session_id: "session".into(),
            server_id: Snowflake::new(10),
            user_id: Snowflake::new(20),
        }
    }

    #[tokio::test]
    async fn updates_in_place_and_replaces_stopped_sessions() {
        let registry = VoiceRegistry::new();
        let config = VoiceConfig::default();

        let first = registry.connect_or_update(info("ws://127.0.0.1:1"), &config);
        let same = registry.connect_or_update(info("ws://127.0.0.1:2"), &config);
        assert_eq!(registry.len(), 1);
        assert_eq!(same.info().endpoint, "ws://127.0.0.1:2");
        assert_eq!(first.info().endpoint, "ws://127.0.0.1:2");

        first.disconnect();
        let fresh = registry.connect_or_update(info("ws://127.0.0.1:3"), &config);
        assert!(!fresh.is_stopped());
        assert_eq!(registry.get(Snowflake::new(10)).unwrap().info().endpoint, "ws://127.0.0.1:3");

        assert!(registry.remove(Snowflake::new(10)).is_some());
        assert!(fresh.is_stopped());
        assert!(registry.is_empty());
    }
}
