use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tidecord_gateway::http::{RestConfig, DEFAULT_API_URL, DEFAULT_USER_AGENT};
use tidecord_gateway::models::gateway::{Activity, PresenceUpdate, DEFAULT_GATEWAY_URL};
use tidecord_gateway::models::intents::Intents;
use tidecord_gateway::ClientConfig;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BotConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// Command prefix, e.g. `?` for `?ping`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Raw intents bitmask. Unknown bits are dropped.
    #[serde(default = "default_intents")]
    pub intents: u64,
    /// "Playing ..." activity shown once identified.
    #[serde(default)]
    pub activity: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            intents: default_intents(),
            activity: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VoiceConfig {
    /// ffmpeg executable used by `?play`.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// How long `?join` waits for the voice handshake.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

fn default_prefix() -> String {
    "?".into()
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.into()
}

fn default_intents() -> u64 {
    (Intents::default() | Intents::MESSAGE_CONTENT).bits()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_ffmpeg() -> String {
    "ffmpeg".into()
}

fn default_join_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Read the TOML file at `path` (defaults when it does not exist), then
    /// apply `TIDECORD_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content =
                fs::read_to_string(path).with_context(|| format!("reading config '{path}'"))?;
            toml::from_str(&content).with_context(|| format!("parsing config '{path}'"))?
        } else {
            tracing::info!("Config file not found at '{}', using defaults", path);
            Config::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("TIDECORD_TOKEN") {
            self.bot.token = Some(value);
        }
        if let Some(value) = var("TIDECORD_INTENTS") {
            match value.trim().parse::<u64>() {
                Ok(bits) => self.gateway.intents = bits,
                Err(_) => tracing::warn!(
                    "Ignoring invalid TIDECORD_INTENTS value '{}'; expected an integer bitmask",
                    value
                ),
            }
        }
        if let Some(value) = var("TIDECORD_USER_AGENT") {
            self.http.user_agent = value;
        }
        if let Some(value) = var("TIDECORD_GATEWAY_URL") {
            self.gateway.url = value;
        }
        if let Some(value) = var("TIDECORD_API_URL") {
            self.http.api_url = value;
        }
    }

    /// The configured token, trimmed. Startup cannot proceed without one.
    pub fn token(&self) -> Result<&str> {
        match self.bot.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => bail!("no bot token configured; set [bot].token, TIDECORD_TOKEN or --token"),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let presence = self.gateway.activity.as_ref().map(|name| PresenceUpdate {
            activities: vec![Activity {
                name: name.clone(),
                kind: 0,
            }],
            ..PresenceUpdate::online()
        });
        ClientConfig {
            gateway_url: self.gateway.url.clone(),
            intents: Intents::from_bits_truncate(self.gateway.intents),
            presence,
            rest: RestConfig {
                base_url: self.http.api_url.clone(),
                user_agent: self.http.user_agent.clone(),
                timeout: Duration::from_secs(self.http.timeout_secs),
                max_retries: self.http.max_retries,
            },
            ..ClientConfig::default()
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.voice.join_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.gateway.url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.http.api_url, DEFAULT_API_URL);
        assert_eq!(config.voice.ffmpeg, "ffmpeg");
        assert!(Intents::from_bits_truncate(config.gateway.intents).contains(Intents::MESSAGE_CONTENT));
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = toml::from_str(
            r#"
            [bot]
            token = "abc"

            [http]
            max_retries = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.token().unwrap(), "abc");
        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.http.max_retries, 7);
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn missing_or_blank_token_is_an_error() {
        let mut config = Config::default();
        assert!(config.token().is_err());
        config.bot.token = Some("   ".into());
        assert!(config.token().is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [bot]
            token = "from-file"
            [gateway]
            intents = 1
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("TIDECORD_TOKEN", "from-env"),
            ("TIDECORD_INTENTS", "513"),
            ("TIDECORD_USER_AGENT", "TestBot (https://example.com, 1.0)"),
            ("TIDECORD_GATEWAY_URL", "ws://127.0.0.1:9000"),
            ("TIDECORD_API_URL", "http://127.0.0.1:9001/api/v10/"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.token().unwrap(), "from-env");
        let client = config.client_config();
        assert_eq!(client.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);
        assert_eq!(client.gateway_url, "ws://127.0.0.1:9000");
        assert_eq!(client.rest.base_url, "http://127.0.0.1:9001/api/v10/");
        assert_eq!(client.rest.user_agent, "TestBot (https://example.com, 1.0)");
    }

    #[test]
    fn invalid_intents_override_is_ignored() {
        let mut config = Config::default();
        let before = config.gateway.intents;
        config.apply_overrides(|key| (key == "TIDECORD_INTENTS").then(|| "lots".to_string()));
        assert_eq!(config.gateway.intents, before);
    }

    #[test]
    fn activity_becomes_identify_presence() {
        let mut config = Config::default();
        assert!(config.client_config().presence.is_none());
        config.gateway.activity = Some("with sockets".into());
        let presence = config.client_config().presence.unwrap();
        assert_eq!(presence.status, "online");
        assert_eq!(presence.activities[0].name, "with sockets");
    }
}
