use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use tokio::time::Instant;

/// Limit key shared by every route when the server signals a global limit.
pub const GLOBAL_KEY: &str = "global";

const HEADER_BUCKET: &str = "x-ratelimit-bucket";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
const HEADER_GLOBAL: &str = "x-ratelimit-global";
const HEADER_SCOPE: &str = "x-ratelimit-scope";
const HEADER_RETRY_AFTER: &str = "retry-after";

/// The rate-limit relevant subset of a response's headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub bucket: Option<String>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let seconds = |name: &str| {
            text(name)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(Duration::from_secs_f64)
        };

        Self {
            bucket: text(HEADER_BUCKET).map(str::to_string),
            remaining: text(HEADER_REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after: seconds(HEADER_RESET_AFTER),
            global: text(HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true"))
                || text(HEADER_SCOPE) == Some("global"),
            retry_after: seconds(HEADER_RETRY_AFTER),
        }
    }

    /// The route's window is used up and must be waited out.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Tracks per-route, per-bucket and global throttle windows.
///
/// Routes start out keyed by their own path. Once the server tells us which
/// bucket a route belongs to, the route resolves to that bucket id, so every
/// route sharing the bucket shares one window. Both maps are safe to mutate
/// from any number of concurrent callers.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// route -> server bucket id
    buckets: DashMap<String, String>,
    /// limit key (bucket id, unbucketed route or [`GLOBAL_KEY`]) -> reset instant
    limits: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key a route's window is stored under.
    pub fn key_for(&self, route: &str) -> String {
        self.buckets
            .get(route)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_else(|| route.to_string())
    }

    pub fn bucket_of(&self, route: &str) -> Option<String> {
        self.buckets.get(route).map(|bucket| bucket.value().clone())
    }

    /// Wait until both the global window and the route's window allow a request.
    pub async fn check_and_wait(&self, route: &str) {
        self.wait_for(GLOBAL_KEY).await;
        let key = self.key_for(route);
        self.wait_for(&key).await;
    }

    /// Associate `route` with a server bucket. The last bucket id seen for a
    /// route wins; a window already pending under the route's own key moves
    /// over to the bucket.
    pub fn register_bucket(&self, route: &str, bucket: &str) {
        let previous = self.buckets.insert(route.to_string(), bucket.to_string());
        if previous.as_deref() == Some(bucket) {
            return;
        }
        if let Some((_, reset_at)) = self.limits.remove(route) {
            self.extend_limit(bucket, reset_at);
        }
        tracing::debug!(route, bucket, "registered rate limit bucket");
    }

    /// Update state from a response's headers: learn the bucket and, when the
    /// window is exhausted, remember when it resets.
    pub fn record_response(&self, route: &str, headers: &RateLimitHeaders) {
        if let Some(bucket) = &headers.bucket {
            self.register_bucket(route, bucket);
        }
        if headers.is_exhausted() {
            if let Some(reset_after) = headers.reset_after {
                let key = self.key_for(route);
                tracing::debug!(route, key = %key, reset_after_ms = reset_after.as_millis() as u64, "rate limit window exhausted");
                self.extend_limit(&key, Instant::now() + reset_after);
            }
        }
    }

    /// Record a 429. Returns the instant the request may be retried.
    pub fn record_rate_limited(&self, route: &str, retry_after: Duration, global: bool) -> Instant {
        let key = if global {
            GLOBAL_KEY.to_string()
        } else {
            self.key_for(route)
        };
        let reset_at = Instant::now() + retry_after;
        tracing::warn!(
            route,
            key = %key,
            global,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limited"
        );
        self.extend_limit(&key, reset_at)
    }

    /// Pending reset instant stored under `key`, if any.
    pub fn limit_for(&self, key: &str) -> Option<Instant> {
        self.limits.get(key).map(|reset_at| *reset_at)
    }

    fn extend_limit(&self, key: &str, reset_at: Instant) -> Instant {
        let mut entry = self.limits.entry(key.to_string()).or_insert(reset_at);
        if *entry < reset_at {
            *entry = reset_at;
        }
        *entry
    }

    async fn wait_for(&self, key: &str) {
        loop {
            // Copy out before sleeping; a map guard must not be held across an await.
            let Some(reset_at) = self.limit_for(key) else {
                return;
            };
            if reset_at <= Instant::now() {
                // Only clear the window we waited for; a newer one may have replaced it.
                self.limits.remove_if(key, |_, current| *current == reset_at);
                return;
            }
            tracing::debug!(key, "waiting for rate limit to reset");
            tokio::time::sleep_until(reset_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test(start_paused = true)]
    async fn route_limit_blocks_only_that_route() {
        let limiter = RateLimiter::new();
        limiter.record_rate_limited("/a", Duration::from_secs(2), false);

        let start = Instant::now();
        limiter.check_and_wait("/b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.check_and_wait("/a").await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
        assert!(waited < Duration::from_millis(2100));

        // The window is consumed once waited out.
        let again = Instant::now();
        limiter.check_and_wait("/a").await;
        assert_eq!(again.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn window_extended_during_the_wait_is_honoured() {
        let limiter = std::sync::Arc::new(RateLimiter::new());
        limiter.record_rate_limited("/a", Duration::from_secs(1), false);

        let start = Instant::now();
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_and_wait("/a").await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        limiter.record_rate_limited("/a", Duration::from_secs(2), false);

        waiter.await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2500), "waited {waited:?}");
        assert!(limiter.limit_for("/a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_blocks_every_route() {
        let limiter = RateLimiter::new();
        limiter.record_rate_limited("/a", Duration::from_secs(1), true);

        let start = Instant::now();
        limiter.check_and_wait("/unrelated").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(limiter.limit_for(GLOBAL_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn routes_sharing_a_bucket_share_a_window() {
        let limiter = RateLimiter::new();
        limiter.register_bucket("/channels/1/messages", "abcd");
        limiter.register_bucket("/channels/2/messages", "abcd");
        limiter.record_rate_limited("/channels/1/messages", Duration::from_secs(3), false);

        let start = Instant::now();
        limiter.check_and_wait("/channels/2/messages").await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn registering_a_bucket_migrates_a_pending_route_limit() {
        let limiter = RateLimiter::new();
        limiter.record_rate_limited("/a", Duration::from_secs(2), false);
        assert!(limiter.limit_for("/a").is_some());

        limiter.register_bucket("/a", "bucket-1");
        assert!(limiter.limit_for("/a").is_none());
        assert!(limiter.limit_for("bucket-1").is_some());

        let start = Instant::now();
        limiter.check_and_wait("/a").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn last_bucket_id_wins() {
        let limiter = RateLimiter::new();
        limiter.register_bucket("/a", "old");
        limiter.register_bucket("/a", "new");
        assert_eq!(limiter.bucket_of("/a").as_deref(), Some("new"));
        assert_eq!(limiter.key_for("/a"), "new");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_headers_set_a_window() {
        let limiter = RateLimiter::new();
        let mut map = HeaderMap::new();
        map.insert(HEADER_BUCKET, HeaderValue::from_static("b1"));
        map.insert(HEADER_REMAINING, HeaderValue::from_static("0"));
        map.insert(HEADER_RESET_AFTER, HeaderValue::from_static("1.5"));
        let headers = RateLimitHeaders::from_headers(&map);
        assert!(headers.is_exhausted());
        assert_eq!(headers.reset_after, Some(Duration::from_millis(1500)));

        limiter.record_response("/x", &headers);
        let start = Instant::now();
        limiter.check_and_wait("/x").await;
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[test]
    fn headers_parse_global_flags() {
        let mut map = HeaderMap::new();
        map.insert(HEADER_GLOBAL, HeaderValue::from_static("true"));
        map.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("4"));
        let headers = RateLimitHeaders::from_headers(&map);
        assert!(headers.global);
        assert_eq!(headers.retry_after, Some(Duration::from_secs(4)));
        assert!(!headers.is_exhausted());

        let mut scoped = HeaderMap::new();
        scoped.insert(HEADER_SCOPE, HeaderValue::from_static("global"));
        assert!(RateLimitHeaders::from_headers(&scoped).global);
        assert_eq!(RateLimitHeaders::from_headers(&HeaderMap::new()), RateLimitHeaders::default());
    }
}
