use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidecord_http::{RestClient, RestConfig};
use tidecord_models::channel::Channel;
use tidecord_models::gateway::{
    GatewayMessage, PresenceUpdate, RequestGuildMembers, VoiceStateUpdateRequest,
    DEFAULT_GATEWAY_URL, OP_PRESENCE_UPDATE, OP_REQUEST_GUILD_MEMBERS, OP_VOICE_STATE_UPDATE,
};
use tidecord_models::guild::Guild;
use tidecord_models::intents::Intents;
use tidecord_models::member::Member;
use tidecord_models::message::{CreateMessage, Message};
use tidecord_models::user::User;
use tidecord_models::Snowflake;
use tidecord_voice::{VoiceConfig, VoiceRegistry, VoiceSession, VoiceSessionInfo};
use tidecord_ws::{Connection, ConnectionConfig, ConnectionHandle};
use tokio::time::Instant;
use url::Url;

use crate::dispatcher::GatewayProtocol;
use crate::voice_link::VoiceLink;
use crate::{Cache, ClientError, EventHandler, NoopHandler, Session};

const VOICE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub intents: Intents,
    /// Presence sent with identify.
    pub presence: Option<PresenceUpdate>,
    pub rest: RestConfig,
    pub connection: ConnectionConfig,
    pub voice: VoiceConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            intents: Intents::default(),
            presence: None,
            rest: RestConfig::default(),
            connection: ConnectionConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

pub struct ClientBuilder {
    token: Option<String>,
    config: ClientConfig,
    handler: Arc<dyn EventHandler>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            token: None,
            config: ClientConfig::default(),
            handler: Arc::new(NoopHandler),
        }
    }
}

impl ClientBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn intents(mut self, intents: Intents) -> Self {
        self.config.intents = intents;
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.gateway_url = url.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.rest.base_url = url.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.rest.user_agent = user_agent.into();
        self
    }

    pub fn presence(mut self, presence: PresenceUpdate) -> Self {
        self.config.presence = Some(presence);
        self
    }

    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    pub fn voice_config(mut self, config: VoiceConfig) -> Self {
        self.config.voice = config;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler(mut self, handler: impl EventHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Validate the configuration and assemble the client. Nothing connects
    /// until [`Client::start`].
    pub fn build(self) -> Result<Client, ClientError> {
        let token = self
            .token
            .as_deref()
            .map(str::trim)
            .map(|t| t.strip_prefix("Bot ").unwrap_or(t).to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingToken)?;

        let gateway = Url::parse(&self.config.gateway_url).map_err(|e| {
            ClientError::InvalidConfig(format!("gateway url {:?}: {e}", self.config.gateway_url))
        })?;
        if !matches!(gateway.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidConfig(format!(
                "gateway url must use ws:// or wss://, got {}",
                gateway.scheme()
            )));
        }

        // Both reqwest and tungstenite run on rustls; pin the ring backend.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let rest = RestClient::new(&token, self.config.rest.clone())?;
        let session = Session::new(token, self.config.intents);
        session.set_presence(self.config.presence.clone());

        Ok(Client {
            inner: Arc::new(Inner {
                session,
                cache: Cache::new(),
                rest,
                voice: Arc::new(VoiceRegistry::new()),
                voice_link: VoiceLink::new(),
                conn: ConnectionHandle::new("gateway"),
                handler: self.handler,
                started: AtomicBool::new(false),
                config: self.config,
            }),
        })
    }
}

struct Inner {
    config: ClientConfig,
    session: Session,
    cache: Cache,
    rest: RestClient,
    voice: Arc<VoiceRegistry>,
    voice_link: VoiceLink,
    conn: ConnectionHandle,
    handler: Arc<dyn EventHandler>,
    started: AtomicBool,
}

/// The gateway client: one gateway session, its entity cache, the REST
/// client and every voice session opened through it. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Connect to the gateway. The connection keeps reconnecting on its own
    /// until [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), ClientError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::InvalidConfig("client already started".into()));
        }
        tracing::info!(url = %self.inner.config.gateway_url, "starting gateway client");
        Connection::start(
            Arc::new(GatewayProtocol::new(self.clone())),
            self.inner.conn.clone(),
            self.inner.config.connection.clone(),
        );
        Ok(())
    }

    /// Wait for `READY` (or `RESUMED`) on the current socket.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.inner.conn.state().ready_to_run.wait_timeout(timeout).await
    }

    pub fn is_ready(&self) -> bool {
        self.inner.conn.is_ready()
    }

    /// Close the gateway and every voice session for good.
    pub fn stop(&self) {
        self.inner.voice.clear();
        self.inner.voice_link.clear();
        self.inner.conn.stop();
    }

    /// Wait until the gateway connection has shut down.
    pub async fn join(&self) {
        self.inner.conn.join().await;
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.inner.conn
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn voice_registry(&self) -> &Arc<VoiceRegistry> {
        &self.inner.voice
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.cache.current_user()
    }

    pub(crate) fn handler(&self) -> &dyn EventHandler {
        self.inner.handler.as_ref()
    }

    pub(crate) fn voice_link(&self) -> &VoiceLink {
        &self.inner.voice_link
    }

    pub(crate) fn connect_voice(&self, info: VoiceSessionInfo) -> VoiceSession {
        tracing::info!(guild_id = %info.server_id, endpoint = %info.endpoint, "voice details complete");
        self.inner.voice.connect_or_update(info, &self.inner.config.voice)
    }

    // ── Lookups: cache first, REST as the slow path ─────────────────────────

    pub async fn guild(&self, guild_id: Snowflake) -> Result<Guild, ClientError> {
        if let Some(guild) = self.inner.cache.guild(guild_id) {
            return Ok(guild);
        }
        tracing::info!(%guild_id, "guild not cached, fetching over REST");
        let guild = self.inner.rest.get_guild(guild_id).await?;
        self.inner.cache.upsert_guild(guild.clone());
        Ok(guild)
    }

    pub async fn channel(&self, channel_id: Snowflake) -> Result<Channel, ClientError> {
        if let Some(channel) = self.inner.cache.channel(channel_id) {
            return Ok(channel);
        }
        tracing::info!(%channel_id, "channel not cached, fetching over REST");
        let channel = self.inner.rest.get_channel(channel_id).await?;
        self.inner.cache.upsert_channel(channel.clone());
        Ok(channel)
    }

    pub async fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Member, ClientError> {
        if let Some(member) = self.inner.cache.member(guild_id, user_id) {
            return Ok(member);
        }
        tracing::info!(%guild_id, %user_id, "member not cached, fetching over REST");
        let member = self.inner.rest.get_guild_member(guild_id, user_id).await?;
        self.inner.cache.upsert_member(guild_id, member.clone());
        Ok(member)
    }

    pub async fn send_message(
        &self,
        channel_id: Snowflake,
        content: impl Into<String>,
    ) -> Result<Message, ClientError> {
        let body = CreateMessage {
            content: content.into(),
            ..Default::default()
        };
        Ok(self.inner.rest.create_message(channel_id, &body).await?)
    }

    // ── Gateway commands ────────────────────────────────────────────────────

    fn send_op<T: serde::Serialize>(&self, op: u8, payload: &T) -> Result<(), ClientError> {
        self.inner.conn.send_json(&GatewayMessage::new(op, payload)?)?;
        Ok(())
    }

    /// Ask to join (or move to) a voice channel. The voice session is started
    /// once the gateway has sent both voice events; see
    /// [`wait_for_voice`](Self::wait_for_voice).
    pub fn join_voice(&self, guild_id: Snowflake, channel_id: Snowflake) -> Result<(), ClientError> {
        tracing::info!(%guild_id, %channel_id, "joining voice");
        self.send_op(
            OP_VOICE_STATE_UPDATE,
            &VoiceStateUpdateRequest {
                guild_id,
                channel_id: Some(channel_id),
                self_mute: false,
                self_deaf: false,
            },
        )
    }

    /// Leave voice in the guild and drop its voice session.
    pub fn leave_voice(&self, guild_id: Snowflake) -> Result<(), ClientError> {
        tracing::info!(%guild_id, "leaving voice");
        self.inner.voice_link.forget(guild_id);
        self.inner.voice.remove(guild_id);
        self.send_op(
            OP_VOICE_STATE_UPDATE,
            &VoiceStateUpdateRequest {
                guild_id,
                channel_id: None,
                self_mute: false,
                self_deaf: false,
            },
        )
    }

    pub fn voice(&self, guild_id: Snowflake) -> Option<VoiceSession> {
        self.inner.voice.get(guild_id)
    }

    /// Wait until the guild has a voice session that completed its handshake.
    pub async fn wait_for_voice(
        &self,
        guild_id: Snowflake,
        timeout: Duration,
    ) -> Result<VoiceSession, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout("voice session"));
            }
            if let Some(session) = self.inner.voice.get(guild_id) {
                if session.wait_ready(deadline - now).await {
                    return Ok(session);
                }
                return Err(ClientError::Timeout("voice session"));
            }
            tokio::time::sleep(VOICE_POLL.min(deadline - now)).await;
        }
    }

    pub fn update_presence(&self, presence: PresenceUpdate) -> Result<(), ClientError> {
        self.inner.session.set_presence(Some(presence.clone()));
        self.send_op(OP_PRESENCE_UPDATE, &presence)
    }

    /// Ask for a guild's member list; results arrive as `GUILD_MEMBERS_CHUNK`
    /// events and land in the cache.
    pub fn request_guild_members(
        &self,
        guild_id: Snowflake,
        query: Option<&str>,
        limit: u32,
    ) -> Result<(), ClientError> {
        self.send_op(
            OP_REQUEST_GUILD_MEMBERS,
            &RequestGuildMembers {
                guild_id,
                query: Some(query.unwrap_or_default().to_string()),
                limit,
                presences: false,
                user_ids: None,
                nonce: None,
            },
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.inner.session)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
