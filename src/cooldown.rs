//! Per-origin cooldown tracking.
//!
//! Records when a rate-limited origin becomes eligible again. Entries are
//! created only in response to a 429 from that origin and consulted before
//! every dispatch attempt, so a call to a cooling-down origin can be
//! answered locally instead of issuing a doomed network call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Remaining cooldown for one origin, as reported by
/// [`CooldownTracker::snapshot`].
#[derive(Debug, Clone)]
pub struct CooldownStatus {
    pub origin: String,
    pub remaining: Duration,
}

/// Tracks which origins answered 429 and when they become eligible again.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    // origin -> deadline after which dispatch may resume
    origins: Arc<RwLock<HashMap<String, Instant>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the origin (scheme+host+port) from a URL.
    pub fn origin_of(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if !parsed.has_host() {
            return None;
        }
        Some(parsed.origin().ascii_serialization())
    }

    /// Remaining cooldown for an origin, if one is active. Expired
    /// entries are evicted here rather than left to accumulate.
    pub async fn remaining(&self, origin: &str) -> Option<Duration> {
        let now = Instant::now();
        {
            let origins = self.origins.read().await;
            match origins.get(origin) {
                Some(deadline) if *deadline > now => return Some(*deadline - now),
                Some(_) => {}
                None => return None,
            }
        }

        // Deadline has passed; drop the stale entry.
        let mut origins = self.origins.write().await;
        if origins.get(origin).is_some_and(|d| *d <= Instant::now()) {
            origins.remove(origin);
            debug!("{}: cooldown expired", origin);
        }
        None
    }

    /// Start or extend a cooldown. An existing later deadline is kept,
    /// so overlapping 429s never shorten the window.
    pub async fn set(&self, origin: &str, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut origins = self.origins.write().await;
        let entry = origins.entry(origin.to_string()).or_insert(deadline);
        if *entry < deadline {
            *entry = deadline;
        }
        warn!("{}: cooling down for {:?}", origin, duration);
    }

    /// All currently active cooldowns.
    pub async fn snapshot(&self) -> Vec<CooldownStatus> {
        let now = Instant::now();
        let origins = self.origins.read().await;
        origins
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(origin, deadline)| CooldownStatus {
                origin: origin.clone(),
                remaining: *deadline - now,
            })
            .collect()
    }
}

impl Clone for CooldownTracker {
    fn clone(&self) -> Self {
        Self {
            origins: self.origins.clone(),
        }
    }
}
