//! General-purpose API client: cooldown gate, in-flight de-duplication,
//! bounded concurrency and retry with backoff.
//!
//! Every caller goes through [`ApiClient::request`]; the pipeline is, in
//! order: cooldown check, de-duplication against identical pending calls,
//! then the retry loop, each attempt dispatching under a concurrency
//! permit and re-checking the cooldown first.

mod request;
mod response;
mod retry;

pub use request::{ApiRequest, CancelToken};
pub use response::{ApiResponse, CANCELLED};
pub use retry::{backoff_delay, parse_retry_after, RetryPolicy};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::cooldown::{CooldownStatus, CooldownTracker};
use crate::inflight::{Flight, InflightRegistry};

use response::RawResponse;

/// Settled exchanges kept in memory for diagnostics.
const RECENT_LOG_CAP: usize = 64;

/// Errors raised while constructing a client.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Record of one settled call, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub method: String,
    pub url: String,
    /// None when no HTTP response was received.
    pub status: Option<u16>,
    /// Network dispatches issued (0 for a local cooldown short-circuit).
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Point-in-time counters for a client.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Logical calls, including de-duplicated joiners.
    pub requests: u64,
    /// Calls that joined an identical in-flight exchange.
    pub deduped: u64,
    /// Backoff retries issued.
    pub retries: u64,
    /// 429s observed, server-sent and locally synthesized.
    pub rate_limit_hits: u64,
    /// Keys with an exchange currently pending.
    pub in_flight: usize,
    /// Origins currently cooling down.
    pub cooldowns: Vec<CooldownStatus>,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    deduped: AtomicU64,
    retries: AtomicU64,
    rate_limit_hits: AtomicU64,
}

/// Shared request pipeline for all API calls.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    cooldowns: CooldownTracker,
    inflight: InflightRegistry,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    recent: Arc<Mutex<VecDeque<RequestLog>>>,
}

impl ApiClient {
    /// Create a client with default configuration.
    pub fn new() -> Result<Self, NetError> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self, NetError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            cooldowns: CooldownTracker::new(),
            inflight: InflightRegistry::new(),
            counters: Arc::new(Counters::default()),
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LOG_CAP))),
            config,
        })
    }

    /// GET `url` through the shared pipeline.
    pub async fn get(&self, url: &str) -> ApiResponse {
        self.request(ApiRequest::get(url)).await
    }

    /// POST a JSON body through the shared pipeline.
    pub async fn post_json(&self, url: &str, body: Value) -> ApiResponse {
        self.request(ApiRequest::post(url).json_body(body)).await
    }

    /// Issue a request. Concurrent calls with the same canonical key
    /// (see [`ApiRequest::key`]) share a single underlying exchange and
    /// observe the same settlement.
    pub async fn request(&self, req: ApiRequest) -> ApiResponse {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let key = req.key();

        loop {
            match self.inflight.begin(&key) {
                Flight::Lead(lease) => {
                    let response = self.execute(&req).await;
                    lease.complete(&response);
                    return response;
                }
                Flight::Join(mut rx) => {
                    debug!("{} {}: joining identical in-flight call", req.method, req.url);
                    self.counters.deduped.fetch_add(1, Ordering::Relaxed);
                    match rx.recv().await {
                        Ok(response) => return response,
                        // Leader went away without settling; take over.
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// The cooldown tracker shared by all calls on this client.
    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Counters plus active per-origin cooldowns.
    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            deduped: self.counters.deduped.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::Relaxed),
            in_flight: self.inflight.len(),
            cooldowns: self.cooldowns.snapshot().await,
        }
    }

    /// The most recently settled calls, oldest first.
    pub async fn recent_requests(&self) -> Vec<RequestLog> {
        self.recent.lock().await.iter().cloned().collect()
    }

    /// Run one call to settlement and record it.
    async fn execute(&self, req: &ApiRequest) -> ApiResponse {
        let started_at = Utc::now();
        let started = Instant::now();
        let (response, attempts) = self.run_attempts(req).await;

        let log = RequestLog {
            method: req.method.to_string(),
            url: req.url.clone(),
            status: (response.status != 0).then_some(response.status),
            attempts,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            "{} {} settled: status={:?} attempts={} in {}ms",
            log.method, log.url, log.status, log.attempts, log.duration_ms
        );

        let mut recent = self.recent.lock().await;
        if recent.len() >= RECENT_LOG_CAP {
            recent.pop_front();
        }
        recent.push_back(log);
        drop(recent);

        response
    }

    /// The retry loop. Returns the settlement and how many network
    /// dispatches were issued.
    async fn run_attempts(&self, req: &ApiRequest) -> (ApiResponse, u32) {
        let retry = req
            .retry
            .clone()
            .unwrap_or_else(|| self.config.retry_policy());
        let origin = CooldownTracker::origin_of(&req.url);
        let mut attempt: u32 = 0;
        let mut dispatches: u32 = 0;

        loop {
            if req.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return (ApiResponse::cancelled(), dispatches);
            }

            // Origin still cooling down: answer locally, no network call.
            if let Some(origin) = &origin {
                if let Some(remaining) = self.cooldowns.remaining(origin).await {
                    self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("{}: on cooldown for {:?}, skipping dispatch", origin, remaining);
                    return (ApiResponse::rate_limited(remaining), dispatches);
                }
            }

            dispatches += 1;
            match self.dispatch(req).await {
                Ok(raw) => {
                    let status = raw.status.as_u16();
                    let retry_after = parse_retry_after(raw.retry_after());

                    if status == 429 {
                        self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                        if let Some(origin) = &origin {
                            let cooldown =
                                retry_after.unwrap_or(self.config.cooldown_fallback);
                            self.cooldowns.set(origin, cooldown).await;
                        }
                    }

                    if retry.is_retryable(status) && attempt < retry.max_retries {
                        let wait = retry.delay(attempt, retry_after);
                        warn!("{} {} -> {}, retrying in {:?}", req.method, req.url, status, wait);
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        if self.backoff_sleep(req, wait).await.is_err() {
                            return (ApiResponse::cancelled(), dispatches);
                        }
                        attempt += 1;
                        continue;
                    }

                    return (ApiResponse::from_raw(raw), dispatches);
                }
                Err(err) => {
                    if attempt < retry.max_retries {
                        let wait = retry.delay(attempt, None);
                        warn!("{} {} failed ({}), retrying in {:?}", req.method, req.url, err, wait);
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        if self.backoff_sleep(req, wait).await.is_err() {
                            return (ApiResponse::cancelled(), dispatches);
                        }
                        attempt += 1;
                        continue;
                    }
                    warn!(
                        "{} {} failed after {} attempts: {}",
                        req.method, req.url, dispatches, err
                    );
                    return (ApiResponse::transport_failure(err.to_string()), dispatches);
                }
            }
        }
    }

    /// Sleep out a backoff delay, or Err if the request is cancelled
    /// before it elapses.
    async fn backoff_sleep(&self, req: &ApiRequest, wait: Duration) -> Result<(), ()> {
        match &req.cancel {
            Some(cancel) => tokio::select! {
                _ = tokio::time::sleep(wait) => Ok(()),
                _ = cancel.cancelled() => Err(()),
            },
            None => {
                tokio::time::sleep(wait).await;
                Ok(())
            }
        }
    }

    /// One network exchange, performed while holding a concurrency
    /// permit. The permit covers send and body read, not backoff sleeps.
    async fn dispatch(&self, req: &ApiRequest) -> Result<RawResponse, reqwest::Error> {
        // The semaphore is never closed, so acquisition cannot fail.
        let _permit = self.permits.acquire().await.ok();

        let mut builder = self.http.request(req.method.clone(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response.text().await?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
