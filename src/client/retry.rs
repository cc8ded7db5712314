//! Retry policy: exponential backoff with jitter and Retry-After floors.

use std::time::Duration;

use rand::Rng;

use crate::config::{
    BACKOFF_JITTER_MS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STATUSES,
    MAX_BACKOFF,
};

/// Retry behavior for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base for `base * 2^attempt`.
    pub backoff_base: Duration,
    /// Statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before retry number `attempt` (0-based). A server-supplied
    /// Retry-After acts as a floor on the computed backoff, never a
    /// ceiling.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS));
        let computed = (backoff_delay(self.backoff_base, attempt) + jitter).min(MAX_BACKOFF);
        match retry_after {
            Some(floor) => computed.max(floor.min(MAX_BACKOFF)),
            None => computed,
        }
    }
}

/// `base * 2^attempt`, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let ms = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

/// Parse a Retry-After header value (integer seconds). Negative or
/// non-numeric values are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let secs = value?.trim().parse::<i64>().ok()?;
    if secs < 0 {
        return None;
    }
    Some(Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(800);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1600));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(3200));
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let base = Duration::from_millis(800);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = backoff_delay(base, attempt);
            assert!(delay >= previous);
            assert!(delay <= MAX_BACKOFF);
            previous = delay;
        }
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some(" 12 ")), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(Some("0")), Some(Duration::from_secs(0)));
        assert_eq!(parse_retry_after(Some("-3")), None);
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_retry_after_is_a_floor() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            ..Default::default()
        };
        let delay = policy.delay(0, Some(Duration::from_secs(5)));
        assert!(delay >= Duration::from_secs(5));
    }

    #[test]
    fn test_default_retry_statuses() {
        let policy = RetryPolicy::default();
        for status in [429, 502, 503, 504] {
            assert!(policy.is_retryable(status));
        }
        for status in [200, 304, 400, 401, 404, 500] {
            assert!(!policy.is_retryable(status));
        }
    }
}
