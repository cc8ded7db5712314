//! Configuration for the request pipeline.
//!
//! All tunables live here as named constants with env-var overrides, so
//! call sites never re-declare their own retry budgets or backoff bases.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::RetryPolicy;

/// Default maximum number of exchanges in true network flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default retry budget (a call issues at most `retries + 1` attempts).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default exponential backoff base (milliseconds).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 800;

/// Maximum jitter added to a computed backoff delay (milliseconds).
pub const BACKOFF_JITTER_MS: u64 = 200;

/// Upper bound on any single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Cooldown applied on 429 when Retry-After is missing or unparsable.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between consecutive view registrations (milliseconds).
pub const DEFAULT_VIEW_PACE_MS: u64 = 750;

/// Configuration for [`crate::client::ApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum concurrent exchanges; further callers wait FIFO.
    pub max_concurrent: usize,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base for `base * 2^attempt` backoff.
    pub backoff_base: Duration,
    /// Cooldown for an origin that answered 429 without a usable
    /// Retry-After header.
    pub cooldown_fallback: Duration,
    /// Statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
    /// Per-request timeout on the underlying transport.
    pub request_timeout: Duration,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            cooldown_fallback: DEFAULT_COOLDOWN,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            request_timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("manthan-net/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `MANTHAN_NET_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u64("MANTHAN_NET_MAX_CONCURRENT") {
            config.max_concurrent = v as usize;
        }
        if let Some(v) = env_u64("MANTHAN_NET_MAX_RETRIES") {
            config.max_retries = v as u32;
        }
        if let Some(v) = env_u64("MANTHAN_NET_BACKOFF_BASE_MS") {
            config.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("MANTHAN_NET_COOLDOWN_SECS") {
            config.cooldown_fallback = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MANTHAN_NET_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(v);
        }
        config
    }

    /// The retry policy used when a request carries no override.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            retry_statuses: self.retry_statuses.clone(),
        }
    }
}

/// Configuration for [`crate::views::ViewQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewQueueConfig {
    /// Endpoint view registrations are POSTed to.
    pub endpoint: String,
    /// Pause after each processed item.
    pub pace: Duration,
}

impl ViewQueueConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            pace: Duration::from_millis(DEFAULT_VIEW_PACE_MS),
        }
    }
}

fn env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}
