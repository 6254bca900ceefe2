use std::time::Duration;

use tidecord_models::gateway::{
    GatewayMessage, Hello, GATEWAY_VERSION, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK,
    OP_HELLO, OP_INVALID_SESSION, OP_RECONNECT,
};
use tidecord_ws::{CloseAction, ConnectionError, ConnectionHandle, Protocol};

use crate::{Client, Event};

// Gateway close codes
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;
pub const CLOSE_INVALID_SEQ: u16 = 4007;
pub const CLOSE_SESSION_TIMED_OUT: u16 = 4009;
pub const CLOSE_INVALID_SHARD: u16 = 4010;
pub const CLOSE_SHARDING_REQUIRED: u16 = 4011;
pub const CLOSE_INVALID_API_VERSION: u16 = 4012;
pub const CLOSE_INVALID_INTENTS: u16 = 4013;
pub const CLOSE_DISALLOWED_INTENTS: u16 = 4014;

/// Append the version and encoding query to a bare gateway URL such as the
/// `resume_gateway_url` handed out by `READY`.
pub fn with_gateway_query(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!(
            "{}/?v={GATEWAY_VERSION}&encoding=json",
            url.trim_end_matches('/')
        )
    }
}

/// The main gateway strategy: identify-or-resume handshake, opcode handling,
/// cache maintenance and event fan-out.
pub(crate) struct GatewayProtocol {
    client: Client,
}

impl GatewayProtocol {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    fn handle_dispatch(&self, frame: GatewayMessage, conn: &ConnectionHandle) -> Result<(), ConnectionError> {
        let Some(name) = frame.t else {
            tracing::warn!(name = %conn.name(), "dispatch without an event name");
            return Ok(());
        };
        let event = Event::from_dispatch(&name, frame.d.unwrap_or_default())?;
        self.apply(&event, conn);
        self.client.handler().on_event(&self.client, event);
        Ok(())
    }

    /// Bring session and cache up to date with one event.
    fn apply(&self, event: &Event, conn: &ConnectionHandle) {
        let client = &self.client;
        let cache = client.cache();
        match event {
            Event::Ready(ready) => {
                client.session().set_ready(
                    ready.session_id.clone(),
                    ready.resume_gateway_url.clone(),
                    ready.user.clone(),
                );
                cache.set_current_user(ready.user.clone());
                for guild in &ready.guilds {
                    if cache.guild(guild.id).is_none() {
                        cache.mark_unavailable(guild.id);
                    }
                }
                conn.state().ready_to_run.set();
                tracing::info!(
                    name = %conn.name(),
                    user = %ready.user.username,
                    guilds = ready.guilds.len(),
                    "gateway ready"
                );
            }
            Event::Resumed => {
                conn.state().ready_to_run.set();
                tracing::info!(name = %conn.name(), seq = ?client.session().sequence(), "gateway session resumed");
            }
            Event::GuildCreate(guild) | Event::GuildUpdate(guild) => {
                cache.upsert_guild(guild.as_ref().clone());
            }
            Event::GuildDelete(deleted) => {
                if deleted.unavailable {
                    tracing::warn!(guild_id = %deleted.id, "guild became unavailable");
                    cache.mark_unavailable(deleted.id);
                } else {
                    cache.remove_guild(deleted.id);
                    client.voice_link().forget(deleted.id);
                    client.voice_registry().remove(deleted.id);
                }
            }
            Event::GuildMemberAdd(member) | Event::GuildMemberUpdate(member) => {
                if let Some(guild_id) = member.guild_id {
                    cache.upsert_member(guild_id, member.as_ref().clone());
                }
            }
            Event::GuildMemberRemove(removed) => {
                cache.remove_member(removed.guild_id, removed.user.id);
            }
            Event::GuildMembersChunk(chunk) => {
                for member in &chunk.members {
                    cache.upsert_member(chunk.guild_id, member.clone());
                }
                tracing::debug!(
                    guild_id = %chunk.guild_id,
                    chunk = chunk.chunk_index + 1,
                    of = chunk.chunk_count,
                    "member chunk cached"
                );
            }
            Event::GuildRoleCreate(role) | Event::GuildRoleUpdate(role) => {
                cache.upsert_role(role.guild_id, role.role.clone());
            }
            Event::GuildRoleDelete(deleted) => cache.remove_role(deleted.guild_id, deleted.role_id),
            Event::ChannelCreate(channel) | Event::ChannelUpdate(channel) => {
                cache.upsert_channel(channel.as_ref().clone());
            }
            Event::ChannelDelete(channel) => {
                cache.remove_channel(channel.id);
            }
            Event::MessageCreate(message) => {
                cache.upsert_user(message.author.clone());
            }
            Event::VoiceStateUpdate(state) => {
                cache.update_voice_state(state.as_ref().clone());
                self.own_voice_state(state);
            }
            Event::VoiceServerUpdate(update) => self.voice_server(update),
            Event::MessageUpdate(_) | Event::MessageDelete(_) | Event::Unknown { .. } => {}
        }
    }

    fn own_voice_state(&self, state: &tidecord_models::voice::VoiceState) {
        let client = &self.client;
        let (Some(me), Some(guild_id)) = (client.session().user(), state.guild_id) else {
            return;
        };
        if state.user_id != me.id {
            return;
        }
        if state.channel_id.is_none() {
            tracing::info!(%guild_id, "left voice");
            client.voice_link().forget(guild_id);
            client.voice_registry().remove(guild_id);
            return;
        }
        if let Some(info) = client
            .voice_link()
            .state_update(guild_id, me.id, state.session_id.clone())
        {
            client.connect_voice(info);
        }
    }

    fn voice_server(&self, update: &tidecord_models::voice::VoiceServerUpdate) {
        let client = &self.client;
        let Some(endpoint) = update.endpoint.clone() else {
            tracing::info!(guild_id = %update.guild_id, "voice server is being reallocated");
            return;
        };
        let Some(me) = client.session().user() else {
            tracing::warn!(guild_id = %update.guild_id, "voice server update before ready");
            return;
        };
        if let Some(info) =
            client
                .voice_link()
                .server_update(update.guild_id, me.id, update.token.clone(), endpoint)
        {
            client.connect_voice(info);
        }
    }
}

impl Protocol for GatewayProtocol {
    type Frame = GatewayMessage;

    fn name(&self) -> &str {
        "gateway"
    }

    fn url(&self) -> String {
        let session = self.client.session();
        match session.resume_url() {
            Some(url) if session.can_resume() => with_gateway_query(&url),
            _ => self.client.config().gateway_url.clone(),
        }
    }

    async fn handshake(&self, conn: ConnectionHandle) -> Result<(), ConnectionError> {
        // The server speaks first: identify only after hello.
        conn.state().heartbeat_ready.wait().await;
        let session = self.client.session();
        let message = session.handshake_message()?;
        if session.can_resume() {
            tracing::info!(name = %conn.name(), session_id = ?session.session_id(), seq = ?session.sequence(), "resuming session");
        } else {
            tracing::info!(name = %conn.name(), intents = session.intents().bits(), "identifying");
        }
        conn.send_json(&message)?;
        conn.state().ready_to_run.wait().await;
        Ok(())
    }

    async fn dispatch(&self, frame: GatewayMessage, conn: &ConnectionHandle) -> Result<(), ConnectionError> {
        if let Some(seq) = frame.s {
            self.client.session().record_sequence(seq);
        }
        tracing::debug!(name = %conn.name(), op = frame.op, seq = ?frame.s, event = ?frame.t, "gateway frame");

        match frame.op {
            OP_DISPATCH => self.handle_dispatch(frame, conn)?,
            OP_HELLO => {
                let hello: Hello = frame.payload()?;
                conn.state()
                    .start_heartbeat(Duration::from_millis(hello.heartbeat_interval.max(1)));
            }
            OP_HEARTBEAT_ACK => conn.state().heartbeat_ack.set(),
            OP_HEARTBEAT => {
                // Server asked for an immediate heartbeat.
                conn.send_json(&self.client.session().heartbeat_message()?)?;
            }
            OP_RECONNECT => {
                tracing::info!(name = %conn.name(), "server requested reconnect");
                conn.reconnect();
            }
            OP_INVALID_SESSION => {
                let resumable = frame.payload::<Option<bool>>()?.unwrap_or(false);
                if !resumable {
                    self.client.session().invalidate();
                }
                tracing::warn!(name = %conn.name(), resumable, "session invalidated");
                conn.reconnect();
            }
            other => {
                tracing::debug!(name = %conn.name(), op = other, "unhandled gateway opcode");
            }
        }
        Ok(())
    }

    fn heartbeat_payload(&self) -> Result<serde_json::Value, ConnectionError> {
        Ok(serde_json::to_value(self.client.session().heartbeat_message()?)?)
    }

    fn on_close(&self, code: u16) -> CloseAction {
        match code {
            CLOSE_AUTHENTICATION_FAILED
            | CLOSE_INVALID_SHARD
            | CLOSE_SHARDING_REQUIRED
            | CLOSE_INVALID_API_VERSION
            | CLOSE_INVALID_INTENTS
            | CLOSE_DISALLOWED_INTENTS => {
                tracing::error!(code, "gateway closed with a fatal code, not reconnecting");
                CloseAction::Stop
            }
            CLOSE_INVALID_SEQ | CLOSE_SESSION_TIMED_OUT => {
                tracing::warn!(code, "gateway session cannot be resumed");
                self.client.session().invalidate();
                CloseAction::Reconnect
            }
            _ => CloseAction::Reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_url_gets_query() {
        assert_eq!(
            with_gateway_query("wss://gateway-us-east1-b.example.gg"),
            "wss://gateway-us-east1-b.example.gg/?v=10&encoding=json"
        );
        assert_eq!(
            with_gateway_query("wss://gateway.example.gg/?v=10&encoding=json"),
            "wss://gateway.example.gg/?v=10&encoding=json"
        );
    }
}
