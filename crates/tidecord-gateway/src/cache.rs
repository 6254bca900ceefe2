use dashmap::DashMap;
use parking_lot::RwLock;
use tidecord_models::channel::Channel;
use tidecord_models::guild::Guild;
use tidecord_models::member::Member;
use tidecord_models::role::Role;
use tidecord_models::user::User;
use tidecord_models::voice::VoiceState;
use tidecord_models::Snowflake;

/// A cached guild, or a tombstone for one the gateway reported unavailable.
#[derive(Debug, Clone, PartialEq)]
pub enum GuildEntry {
    Available(Guild),
    Unavailable,
}

/// Entity directory maintained from gateway events.
///
/// Only the dispatcher writes; handlers and user code read concurrently.
/// Guilds are stored without their member/channel/voice-state lists, which
/// live in the keyed maps below.
#[derive(Debug, Default)]
pub struct Cache {
    current_user: RwLock<Option<User>>,
    guilds: DashMap<Snowflake, GuildEntry>,
    channels: DashMap<Snowflake, Channel>,
    members: DashMap<(Snowflake, Snowflake), Member>,
    users: DashMap<Snowflake, User>,
    voice_states: DashMap<(Snowflake, Snowflake), VoiceState>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    pub fn guild_entry(&self, id: Snowflake) -> Option<GuildEntry> {
        self.guilds.get(&id).map(|g| g.value().clone())
    }

    /// The guild, if cached and available.
    pub fn guild(&self, id: Snowflake) -> Option<Guild> {
        match self.guilds.get(&id)?.value() {
            GuildEntry::Available(guild) => Some(guild.clone()),
            GuildEntry::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self, id: Snowflake) -> bool {
        matches!(
            self.guilds.get(&id).as_deref(),
            Some(GuildEntry::Unavailable)
        )
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.iter().map(|g| *g.key()).collect()
    }

    pub fn channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.get(&id).map(|c| c.value().clone())
    }

    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| c.guild_id == Some(guild_id))
            .map(|c| c.value().clone())
            .collect()
    }

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.members
            .get(&(guild_id, user_id))
            .map(|m| m.value().clone())
    }

    pub fn user(&self, id: Snowflake) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn voice_state(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<VoiceState> {
        self.voice_states
            .get(&(guild_id, user_id))
            .map(|v| v.value().clone())
    }

    /// The voice channel `user_id` is connected to in `guild_id`.
    pub fn user_voice_channel(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Snowflake> {
        self.voice_states
            .get(&(guild_id, user_id))
            .and_then(|v| v.channel_id)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    pub fn set_current_user(&self, user: User) {
        self.upsert_user(user.clone());
        *self.current_user.write() = Some(user);
    }

    /// Insert or replace a guild and everything a `GUILD_CREATE` carries.
    pub fn upsert_guild(&self, mut guild: Guild) {
        let guild_id = guild.id;
        for mut channel in std::mem::take(&mut guild.channels) {
            channel.guild_id = Some(guild_id);
            self.upsert_channel(channel);
        }
        for member in std::mem::take(&mut guild.members) {
            self.upsert_member(guild_id, member);
        }
        for mut state in std::mem::take(&mut guild.voice_states) {
            state.guild_id = Some(guild_id);
            self.update_voice_state(state);
        }
        guild.unavailable = false;
        self.guilds.insert(guild_id, GuildEntry::Available(guild));
    }

    /// Replace the guild with a tombstone. Its channels and members stay,
    /// since an outage does not remove them.
    pub fn mark_unavailable(&self, id: Snowflake) {
        self.guilds.insert(id, GuildEntry::Unavailable);
    }

    /// Drop a guild and everything scoped to it.
    pub fn remove_guild(&self, id: Snowflake) -> Option<GuildEntry> {
        self.channels.retain(|_, c| c.guild_id != Some(id));
        self.members.retain(|(guild_id, _), _| *guild_id != id);
        self.voice_states.retain(|(guild_id, _), _| *guild_id != id);
        self.guilds.remove(&id).map(|(_, entry)| entry)
    }

    pub fn upsert_channel(&self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn remove_channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.remove(&id).map(|(_, c)| c)
    }

    /// Members without a user object cannot be keyed and are skipped.
    pub fn upsert_member(&self, guild_id: Snowflake, mut member: Member) {
        let Some(user) = member.user.clone() else {
            return;
        };
        member.guild_id = Some(guild_id);
        self.members.insert((guild_id, user.id), member);
        self.upsert_user(user);
    }

    pub fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.voice_states.remove(&(guild_id, user_id));
        self.members.remove(&(guild_id, user_id)).map(|(_, m)| m)
    }

    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn upsert_role(&self, guild_id: Snowflake, role: Role) {
        if let Some(mut entry) = self.guilds.get_mut(&guild_id) {
            if let GuildEntry::Available(guild) = entry.value_mut() {
                match guild.roles.iter_mut().find(|r| r.id == role.id) {
                    Some(existing) => *existing = role,
                    None => guild.roles.push(role),
                }
            }
        }
    }

    pub fn remove_role(&self, guild_id: Snowflake, role_id: Snowflake) {
        if let Some(mut entry) = self.guilds.get_mut(&guild_id) {
            if let GuildEntry::Available(guild) = entry.value_mut() {
                guild.roles.retain(|r| r.id != role_id);
            }
        }
    }

    /// Apply a voice state. Leaving voice (no channel) removes the entry.
    pub fn update_voice_state(&self, state: VoiceState) {
        let Some(guild_id) = state.guild_id else {
            return;
        };
        let key = (guild_id, state.user_id);
        if state.channel_id.is_none() {
            self.voice_states.remove(&key);
            return;
        }
        if let Some(member) = state.member.clone() {
            self.upsert_member(guild_id, member);
        }
        self.voice_states.insert(key, state);
    }

    pub fn clear(&self) {
        self.current_user.write().take();
        self.guilds.clear();
        self.channels.clear();
        self.members.clear();
        self.users.clear();
        self.voice_states.clear();
    }
}
