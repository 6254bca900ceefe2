use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tidecord_models::gateway::{
    ConnectionProperties, GatewayMessage, Identify, PresenceUpdate, Resume, OP_HEARTBEAT,
    OP_IDENTIFY, OP_RESUME,
};
use tidecord_models::intents::Intents;
use tidecord_models::user::User;

pub const LIBRARY_NAME: &str = "tidecord";

/// State of one logical gateway session.
///
/// `sequence` and `session_id` survive a reconnect that resumes; both are
/// cleared by [`invalidate`](Self::invalidate) when the next connect has to
/// identify from scratch.
pub struct Session {
    token: String,
    intents: Intents,
    properties: ConnectionProperties,
    presence: RwLock<Option<PresenceUpdate>>,
    /// Zero until the first sequenced frame arrives.
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    resume_url: RwLock<Option<String>>,
    user: RwLock<Option<User>>,
}

impl Session {
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: ConnectionProperties::for_library(LIBRARY_NAME),
            presence: RwLock::new(None),
            sequence: AtomicU64::new(0),
            session_id: RwLock::new(None),
            resume_url: RwLock::new(None),
            user: RwLock::new(None),
        }
    }

    pub fn intents(&self) -> Intents {
        self.intents
    }

    /// Remember a sequence number. The stored value never goes backwards.
    pub fn record_sequence(&self, seq: u64) {
        self.sequence.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn sequence(&self) -> Option<u64> {
        match self.sequence.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.resume_url.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    /// Store what `READY` handed out.
    pub fn set_ready(&self, session_id: String, resume_url: Option<String>, user: User) {
        *self.session_id.write() = Some(session_id);
        *self.resume_url.write() = resume_url;
        *self.user.write() = Some(user);
    }

    /// Presence sent along with the next identify.
    pub fn set_presence(&self, presence: Option<PresenceUpdate>) {
        *self.presence.write() = presence;
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.read().is_some() && self.sequence().is_some()
    }

    /// Forget the resumable session; the next connect identifies.
    pub fn invalidate(&self) {
        self.session_id.write().take();
        self.resume_url.write().take();
        self.sequence.store(0, Ordering::SeqCst);
    }

    pub fn identify_payload(&self) -> Identify {
        Identify {
            token: self.token.clone(),
            intents: self.intents,
            properties: self.properties.clone(),
            presence: self.presence.read().clone(),
        }
    }

    pub fn resume_payload(&self) -> Option<Resume> {
        let session_id = self.session_id.read().clone()?;
        let seq = self.sequence()?;
        Some(Resume {
            token: self.token.clone(),
            session_id,
            seq,
        })
    }

    /// Resume when a prior session and sequence exist, identify otherwise.
    pub fn handshake_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        match self.resume_payload() {
            Some(resume) => GatewayMessage::new(OP_RESUME, &resume),
            None => GatewayMessage::new(OP_IDENTIFY, &self.identify_payload()),
        }
    }

    pub fn heartbeat_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        GatewayMessage::new(OP_HEARTBEAT, &self.sequence())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("intents", &self.intents)
            .field("sequence", &self.sequence())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidecord_models::Snowflake;

    fn user() -> User {
        User {
            id: Snowflake::new(5),
            username: "bot".into(),
            discriminator: None,
            global_name: None,
            avatar: None,
            bot: true,
        }
    }

    #[test]
    fn sequence_is_the_maximum_seen() {
        let session = Session::new("t", Intents::default());
        assert_eq!(session.sequence(), None);
        for seq in [1, 2, 5, 3, 4, 9, 7] {
            session.record_sequence(seq);
        }
        assert_eq!(session.sequence(), Some(9));
    }

    #[test]
    fn identifies_without_a_prior_session() {
        let session = Session::new("t", Intents::GUILDS);
        session.record_sequence(3);
        let msg = serde_json::to_value(session.handshake_message().unwrap()).unwrap();
        assert_eq!(msg["op"], 2);
        assert_eq!(msg["d"]["token"], "t");
        assert_eq!(msg["d"]["intents"], 1);
        assert_eq!(msg["d"]["properties"]["browser"], LIBRARY_NAME);
    }

    #[test]
    fn resumes_with_session_and_sequence() {
        let session = Session::new("t", Intents::default());
        session.set_ready("abc".into(), Some("wss://resume.example".into()), user());
        // Session id alone is not enough.
        assert!(!session.can_resume());
        session.record_sequence(42);

        let msg = serde_json::to_value(session.handshake_message().unwrap()).unwrap();
        assert_eq!(
            msg,
            json!({"op": 6, "d": {"token": "t", "session_id": "abc", "seq": 42}})
        );

        session.invalidate();
        assert!(!session.can_resume());
        assert_eq!(session.resume_url(), None);
        assert_eq!(session.handshake_message().unwrap().op, OP_IDENTIFY);
    }

    #[test]
    fn heartbeat_carries_sequence_or_null() {
        let session = Session::new("t", Intents::default());
        let first = serde_json::to_value(session.heartbeat_message().unwrap()).unwrap();
        assert_eq!(first, json!({"op": 1, "d": null}));
        session.record_sequence(8);
        let next = serde_json::to_value(session.heartbeat_message().unwrap()).unwrap();
        assert_eq!(next, json!({"op": 1, "d": 8}));
    }

    #[test]
    fn debug_hides_token() {
        let session = Session::new("secret-token", Intents::default());
        assert!(!format!("{session:?}").contains("secret-token"));
    }
}
