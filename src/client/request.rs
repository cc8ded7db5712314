//! Request description, canonical keys and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;

use super::retry::RetryPolicy;

/// A single API call and its per-request overrides.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    /// Overrides the client's retry policy for this call.
    pub retry: Option<RetryPolicy>,
    /// Overrides the canonical key; calls that must not share flight
    /// pass a distinct key here.
    pub dedupe_key: Option<String>,
    pub cancel: Option<CancelToken>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: HashMap::new(),
            retry: None,
            dedupe_key: None,
            cancel: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Canonical identity of this call: method, URL and serialized body.
    /// Two concurrent calls with the same key share one exchange.
    pub fn key(&self) -> String {
        if let Some(key) = &self.dedupe_key {
            return key.clone();
        }
        let body = self.body.as_ref().map(Value::to_string).unwrap_or_default();
        format!("{} {} {}", self.method, self.url, body)
    }
}

/// Cooperative cancellation for a request and its retry loop.
///
/// Cancellation observed before dispatch or during a backoff sleep stops
/// the loop; the call resolves with a distinguished cancelled result
/// instead of continuing in the background.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(false).0),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_key_derivation() {
        let plain = ApiRequest::get("https://api.example.com/feed");
        assert_eq!(plain.key(), "GET https://api.example.com/feed ");

        let with_body =
            ApiRequest::post("https://api.example.com/posts").json_body(serde_json::json!({"title": "hi"}));
        assert_eq!(
            with_body.key(),
            r#"POST https://api.example.com/posts {"title":"hi"}"#
        );
    }

    #[test]
    fn test_key_override() {
        let req = ApiRequest::get("https://api.example.com/feed").dedupe_key("feed-page-1");
        assert_eq!(req.key(), "feed-page-1");
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        token.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken")
            .expect("waiter task");
    }
}
