use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidecord_models::channel::Channel;
use tidecord_models::gateway::GatewayBot;
use tidecord_models::guild::Guild;
use tidecord_models::member::Member;
use tidecord_models::message::{CreateMessage, Message};
use tidecord_models::Snowflake;
use url::Url;

use crate::{HttpError, RateLimitHeaders, RateLimiter};

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10/";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (tidecord, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Used when a 429 carries neither a body nor a `Retry-After` header.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Extra attempts allowed after a 429 before giving up.
    pub max_retries: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitedBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

/// HTTP client for the REST API. Every request goes through the shared
/// [`RateLimiter`] first.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl RestClient {
    pub fn new(token: &str, config: RestConfig) -> Result<Self, HttpError> {
        let mut auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|e| HttpError::InvalidHeader(e.to_string()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        // A base without a trailing slash would lose its last segment on join.
        let mut base = config.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            limiter: Arc::new(RateLimiter::new()),
            max_retries: config.max_retries,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send a request and decode the JSON response. An empty (204) response
    /// decodes as JSON `null`, so `()` and `Option<T>` work as return types.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        let value = self.request_value(method, path, body).await?;
        Ok(T::deserialize(value.unwrap_or(Value::Null))?)
    }

    /// Send a request, retrying 429s through the rate limiter.
    pub async fn request_value(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, HttpError> {
        let route = route_of(path);
        let url = self.base_url.join(route.trim_start_matches('/'))?;
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            self.limiter.check_and_wait(&route).await;

            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = &body {
                request = request.json(body);
            }
            tracing::debug!(method = %method, route = %route, attempt, "sending request");
            let response = request.send().await?;
            let status = response.status();
            let headers = RateLimitHeaders::from_headers(response.headers());
            self.limiter.record_response(&route, &headers);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let limited: RateLimitedBody = response.json().await.unwrap_or_default();
                let retry_after = limited
                    .retry_after
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(Duration::from_secs_f64)
                    .or(headers.retry_after)
                    .unwrap_or(FALLBACK_RETRY_AFTER);
                self.limiter
                    .record_rate_limited(&route, retry_after, limited.global || headers.global);
                continue;
            }

            let bytes = response.bytes().await?;
            if status.is_success() {
                if bytes.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }

            let error: ApiErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
            let message = if error.message.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                error.message
            };
            tracing::debug!(method = %method, route = %route, status = status.as_u16(), code = error.code, "request failed");
            return Err(HttpError::Status {
                status: status.as_u16(),
                code: error.code,
                message,
            });
        }

        Err(HttpError::RateLimited { route, attempts })
    }

    pub async fn get_gateway_bot(&self) -> Result<GatewayBot, HttpError> {
        self.request::<_, ()>(Method::GET, "/gateway/bot", None).await
    }

    pub async fn get_guild(&self, guild_id: Snowflake) -> Result<Guild, HttpError> {
        self.request::<_, ()>(Method::GET, &format!("/guilds/{guild_id}"), None)
            .await
    }

    pub async fn get_channel(&self, channel_id: Snowflake) -> Result<Channel, HttpError> {
        self.request::<_, ()>(Method::GET, &format!("/channels/{channel_id}"), None)
            .await
    }

    pub async fn get_guild_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Member, HttpError> {
        let mut member: Member = self
            .request::<_, ()>(
                Method::GET,
                &format!("/guilds/{guild_id}/members/{user_id}"),
                None,
            )
            .await?;
        member.guild_id = Some(guild_id);
        Ok(member)
    }

    pub async fn create_message(
        &self,
        channel_id: Snowflake,
        message: &CreateMessage,
    ) -> Result<Message, HttpError> {
        self.request(
            Method::POST,
            &format!("/channels/{channel_id}/messages"),
            Some(message),
        )
        .await
    }
}

/// Normalise a request path into the route key used for rate limiting.
fn route_of(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("/{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_ignore_query_and_leading_slashes() {
        assert_eq!(route_of("channels/1/messages"), "/channels/1/messages");
        assert_eq!(route_of("/guilds/1/members?limit=5"), "/guilds/1/members");
    }

    #[test]
    fn base_url_keeps_its_version_segment() {
        let client = RestClient::new(
            "token",
            RestConfig {
                base_url: "https://example.invalid/api/v10".to_string(),
                ..RestConfig::default()
            },
        )
        .unwrap();
        let joined = client.base_url().join("gateway/bot").unwrap();
        assert_eq!(joined.as_str(), "https://example.invalid/api/v10/gateway/bot");
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = RestClient::new("bad\ntoken", RestConfig::default()).unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeader(_)));
    }
}
