//! REST access with rate-limit compliance.

pub mod error;
pub mod ratelimit;
pub mod rest;

pub use error::HttpError;
pub use ratelimit::{RateLimitHeaders, RateLimiter, GLOBAL_KEY};
pub use rest::{RestClient, RestConfig, DEFAULT_API_URL, DEFAULT_USER_AGENT};

pub use reqwest::Method;
