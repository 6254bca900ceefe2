use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tidecord_gateway::models::message::Message;
use tidecord_gateway::models::Snowflake;
use tidecord_gateway::voice::{AfterFinish, AudioPlayer, FfmpegSource, Track, VoiceError};
use tidecord_gateway::{Client, Event, EventHandler};
use tokio::runtime::Handle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(String),
    Join,
    Play(String),
    Pause,
    Resume,
    Skip,
    Leave,
}

impl Command {
    /// Parse `content` as a command if it starts with `prefix`.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim().strip_prefix(prefix)?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name.to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "echo" if !arg.is_empty() => Self::Echo(arg.to_string()),
            "join" => Self::Join,
            "play" if !arg.is_empty() => Self::Play(arg.to_string()),
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "skip" => Self::Skip,
            "leave" => Self::Leave,
            _ => return None,
        };
        Some(command)
    }
}

/// Demo bot: text commands plus one audio player per guild. Clones share
/// the players.
#[derive(Clone)]
pub struct Bot {
    prefix: Arc<str>,
    ffmpeg: Arc<str>,
    join_timeout: Duration,
    players: Arc<DashMap<Snowflake, Arc<AudioPlayer>>>,
}

impl Bot {
    pub fn new(prefix: &str, ffmpeg: &str, join_timeout: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ffmpeg: ffmpeg.into(),
            join_timeout,
            players: Arc::new(DashMap::new()),
        }
    }

    fn on_message(&self, client: &Client, message: &Message) {
        if message.author.bot {
            return;
        }
        let Some(command) = Command::parse(&self.prefix, &message.content) else {
            return;
        };
        tracing::info!(
            channel_id = %message.channel_id,
            author = %message.author.username,
            ?command,
            "command"
        );
        let channel_id = message.channel_id;

        match command {
            Command::Ping => reply(client, channel_id, "pong"),
            Command::Echo(text) => reply(client, channel_id, text),
            voice => match message.guild_id {
                Some(guild_id) => {
                    self.voice_command(client, guild_id, channel_id, message.author.id, voice)
                }
                None => reply(client, channel_id, "voice commands only work in a server"),
            },
        }
    }

    fn voice_command(
        &self,
        client: &Client,
        guild_id: Snowflake,
        channel_id: Snowflake,
        author: Snowflake,
        command: Command,
    ) {
        match command {
            Command::Join => self.join(client, guild_id, channel_id, author),
            Command::Play(path) => self.play(client, guild_id, channel_id, path),
            Command::Pause => self.with_player(client, guild_id, channel_id, "paused", |p| p.pause()),
            Command::Resume => self.with_player(client, guild_id, channel_id, "resumed", |p| p.resume()),
            Command::Skip => self.with_player(client, guild_id, channel_id, "skipped", |p| p.skip()),
            Command::Leave => self.leave(client, guild_id, channel_id),
            Command::Ping | Command::Echo(_) => {}
        }
    }

    fn join(&self, client: &Client, guild_id: Snowflake, channel_id: Snowflake, author: Snowflake) {
        let Some(voice_channel) = client.cache().user_voice_channel(guild_id, author) else {
            return reply(client, channel_id, "join a voice channel first");
        };
        if let Err(e) = client.join_voice(guild_id, voice_channel) {
            tracing::warn!(%guild_id, error = %e, "join request failed");
            return reply(client, channel_id, format!("could not join: {e}"));
        }
        let client = client.clone();
        let timeout = self.join_timeout;
        tokio::spawn(async move {
            let text = match client.wait_for_voice(guild_id, timeout).await {
                Ok(_) => "connected".to_string(),
                Err(e) => {
                    tracing::warn!(%guild_id, error = %e, "voice connection did not come up");
                    format!("voice connection failed: {e}")
                }
            };
            send(&client, channel_id, text).await;
        });
    }

    fn play(&self, client: &Client, guild_id: Snowflake, channel_id: Snowflake, path: String) {
        if client.voice(guild_id).is_none() {
            return reply(client, channel_id, "not in a voice channel, use ?join first");
        }
        let player = match self.player(client, guild_id) {
            Ok(player) => player,
            Err(e) => {
                tracing::error!(%guild_id, error = %e, "could not start audio player");
                return reply(client, channel_id, format!("could not start player: {e}"));
            }
        };

        let runtime = Handle::current();
        let announce = client.clone();
        let title = path.clone();
        let track = Track::new(FfmpegSource::new(&path).program(&*self.ffmpeg)).on_finish(move || {
            // Runs on the player thread.
            runtime.spawn(async move {
                send(&announce, channel_id, format!("finished {title}")).await;
            });
        });

        let queued = player.queued();
        match player.enqueue(track) {
            Ok(()) if queued == 0 => reply(client, channel_id, format!("playing {path}")),
            Ok(()) => reply(client, channel_id, format!("queued {path} ({} ahead)", queued)),
            Err(e) => reply(client, channel_id, format!("could not queue: {e}")),
        }
    }

    fn with_player(
        &self,
        client: &Client,
        guild_id: Snowflake,
        channel_id: Snowflake,
        done: &str,
        action: impl FnOnce(&AudioPlayer) -> Result<(), VoiceError>,
    ) {
        let Some(player) = self.players.get(&guild_id).map(|p| p.clone()) else {
            return reply(client, channel_id, "nothing is playing");
        };
        match action(&player) {
            Ok(()) => reply(client, channel_id, done),
            Err(e) => reply(client, channel_id, format!("player error: {e}")),
        }
    }

    fn leave(&self, client: &Client, guild_id: Snowflake, channel_id: Snowflake) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            // Joins the player thread.
            tokio::task::spawn_blocking(move || player.shutdown());
        }
        match client.leave_voice(guild_id) {
            Ok(()) => reply(client, channel_id, "bye"),
            Err(e) => {
                tracing::warn!(%guild_id, error = %e, "leave request failed");
                reply(client, channel_id, format!("could not leave: {e}"));
            }
        }
    }

    fn player(&self, client: &Client, guild_id: Snowflake) -> Result<Arc<AudioPlayer>, VoiceError> {
        if let Some(player) = self.players.get(&guild_id) {
            return Ok(player.clone());
        }
        let player = Arc::new(AudioPlayer::new(
            client.voice_registry().clone(),
            guild_id,
            AfterFinish::Idle,
        )?);
        Ok(self.players.entry(guild_id).or_insert(player).clone())
    }

    /// Stop every player thread.
    pub fn shutdown(&self) {
        for entry in self.players.iter() {
            entry.value().shutdown();
        }
        self.players.clear();
    }
}

impl EventHandler for Bot {
    fn on_event(&self, client: &Client, event: Event) {
        match event {
            Event::MessageCreate(message) => self.on_message(client, &message),
            Event::Ready(ready) => {
                tracing::info!(user = %ready.user.username, prefix = %self.prefix, "bot online");
            }
            _ => {}
        }
    }
}

fn reply(client: &Client, channel_id: Snowflake, text: impl Into<String>) {
    let client = client.clone();
    let text = text.into();
    tokio::spawn(async move { send(&client, channel_id, text).await });
}

async fn send(client: &Client, channel_id: Snowflake, text: String) {
    if let Err(e) = client.send_message(channel_id, text).await {
        tracing::warn!(%channel_id, error = %e, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_prefix() {
        assert_eq!(Command::parse("?", "?ping"), Some(Command::Ping));
        assert_eq!(Command::parse("?", "  ?PING  "), Some(Command::Ping));
        assert_eq!(
            Command::parse("?", "?echo hello   world"),
            Some(Command::Echo("hello   world".into()))
        );
        assert_eq!(
            Command::parse("?", "?play /tmp/song.mp3"),
            Some(Command::Play("/tmp/song.mp3".into()))
        );
        assert_eq!(Command::parse("!", "!leave"), Some(Command::Leave));
    }

    #[test]
    fn ignores_other_messages() {
        assert_eq!(Command::parse("?", "ping"), None);
        assert_eq!(Command::parse("?", "?"), None);
        assert_eq!(Command::parse("?", "?dance"), None);
        assert_eq!(Command::parse("?", "?play"), None);
        assert_eq!(Command::parse("?", "?echo   "), None);
    }

    #[tokio::test]
    async fn voice_commands_without_a_player_do_nothing_to_state() {
        let bot = Bot::new("?", "ffmpeg", Duration::from_secs(1));
        let client = Client::builder()
            .token("t")
            .api_url("http://127.0.0.1:1/api/v10/")
            .build()
            .unwrap();
        bot.with_player(&client, Snowflake::new(1), Snowflake::new(2), "paused", |p| p.pause());
        assert!(bot.players.is_empty());
        bot.shutdown();
    }
}
