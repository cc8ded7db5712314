//! Uniform result shape and content-type aware decoding.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Error string carried by results of calls stopped by a
/// [`CancelToken`](super::CancelToken).
pub const CANCELLED: &str = "request cancelled";

/// Raw pieces of a settled exchange, read while the concurrency permit
/// is held.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn retry_after(&self) -> Option<&str> {
        self.header("retry-after")
    }
}

/// Structured result of a call through [`ApiClient`](super::ApiClient).
///
/// Calls never surface a transport error at the type level: exhausted
/// retries, local cooldown short-circuits and cancellations all land
/// here with `ok == false`. `status == 0` means no HTTP response was
/// received at all.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Decoded JSON payload, when the response carried one.
    pub data: Option<Value>,
    /// Raw body, when the response was not decodable JSON.
    pub text: Option<String>,
    /// Human-readable failure message, when `ok` is false.
    pub error: Option<String>,
}

impl ApiResponse {
    /// Decode a settled exchange into the uniform shape. Infallible: a
    /// JSON content-type with an unparsable body degrades to text.
    pub(crate) fn from_raw(raw: RawResponse) -> Self {
        let ok = raw.status.is_success();
        let status = raw.status.as_u16();
        let claims_json = raw
            .content_type()
            .is_some_and(|ct| ct.contains("json"));

        if claims_json {
            if let Ok(data) = serde_json::from_str::<Value>(&raw.body) {
                let error = (!ok).then(|| {
                    data.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| status_reason(raw.status))
                });
                return Self {
                    ok,
                    status,
                    headers: raw.headers,
                    data: Some(data),
                    text: None,
                    error,
                };
            }
        }

        let error = (!ok).then(|| status_reason(raw.status));
        Self {
            ok,
            status,
            headers: raw.headers,
            data: None,
            text: Some(raw.body),
            error,
        }
    }

    /// Synthetic 429 for a call short-circuited by an active cooldown.
    pub(crate) fn rate_limited(remaining: Duration) -> Self {
        let secs = remaining.as_secs_f64().ceil() as u64;
        Self {
            ok: false,
            status: 429,
            headers: HashMap::new(),
            data: None,
            text: None,
            error: Some(format!("Rate-limited. Try after {}s", secs.max(1))),
        }
    }

    /// Failure with no HTTP response (DNS, refused, reset, timeout).
    pub(crate) fn transport_failure(error: String) -> Self {
        Self {
            ok: false,
            status: 0,
            headers: HashMap::new(),
            data: None,
            text: None,
            error: Some(error),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            ok: false,
            status: 0,
            headers: HashMap::new(),
            data: None,
            text: None,
            error: Some(CANCELLED.to_string()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED)
    }

    /// Deserialize the JSON payload into a caller type.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, content_type: &str, body: &str) -> RawResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_json_success() {
        let response = ApiResponse::from_raw(raw(200, "application/json", r#"{"id": 7}"#));
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["id"], 7);
        assert!(response.text.is_none());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_json_error_uses_message_field() {
        let response = ApiResponse::from_raw(raw(
            422,
            "application/json; charset=utf-8",
            r#"{"message": "title too long"}"#,
        ));
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("title too long"));
        // Body preserved for caller inspection.
        assert!(response.data.is_some());
    }

    #[test]
    fn test_json_error_without_message_falls_back_to_reason() {
        let response = ApiResponse::from_raw(raw(404, "application/json", r#"{"code": 4}"#));
        assert_eq!(response.error.as_deref(), Some("Not Found"));
    }

    #[test]
    fn test_unparsable_json_degrades_to_text() {
        let response = ApiResponse::from_raw(raw(200, "application/json", "<html>oops</html>"));
        assert!(response.ok);
        assert!(response.data.is_none());
        assert_eq!(response.text.as_deref(), Some("<html>oops</html>"));
    }

    #[test]
    fn test_plain_text_error() {
        let response = ApiResponse::from_raw(raw(503, "text/plain", "upstream down"));
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("Service Unavailable"));
        assert_eq!(response.text.as_deref(), Some("upstream down"));
    }

    #[test]
    fn test_empty_body() {
        let response = ApiResponse::from_raw(raw(204, "application/json", ""));
        assert!(response.ok);
        assert_eq!(response.text.as_deref(), Some(""));
    }

    #[test]
    fn test_rate_limited_message() {
        let response = ApiResponse::rate_limited(Duration::from_millis(4200));
        assert!(!response.ok);
        assert_eq!(response.status, 429);
        assert_eq!(response.error.as_deref(), Some("Rate-limited. Try after 5s"));
    }

    #[test]
    fn test_typed_decode() {
        #[derive(serde::Deserialize)]
        struct Post {
            id: u64,
        }
        let response = ApiResponse::from_raw(raw(200, "application/json", r#"{"id": 42}"#));
        let post: Post = response.json().expect("decodes");
        assert_eq!(post.id, 42);
    }
}
