//! Transport seam: one HTTP call to the completion endpoint.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::Result;

/// Header carrying the provider's cooldown hint.
pub const RETRY_AFTER: &str = "retry-after";

/// A single outbound chat completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Endpoint receiving the POST.
    pub url: Url,
    /// Resolved credential, sent as both `Authorization: Bearer` and `api-key`.
    pub api_key: String,
    /// JSON request body.
    pub body: Value,
}

impl ChatRequest {
    /// Creates a new request.
    pub fn new(url: Url, api_key: impl Into<String>, body: Value) -> Self {
        Self {
            url,
            api_key: api_key.into(),
            body,
        }
    }
}

/// Raw answer of the endpoint. Any HTTP status is a successful transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Retry-After` header, if any.
    pub retry_after: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Creates a 200 response with a JSON body.
    pub fn json_ok(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// Set the `Retry-After` header value.
    #[must_use]
    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    /// True for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for 429 and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as lossy UTF-8, for diagnostics.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues single chat completion calls.
///
/// Implementations return `Ok` for every HTTP answer, whatever its status, and
/// `Err` only when no answer was received. Timeouts are reported with
/// [`ErrorKind::Timeout`] and connection failures with [`ErrorKind::NetworkError`].
///
/// [`ErrorKind::Timeout`]: crate::ErrorKind::Timeout
/// [`ErrorKind::NetworkError`]: crate::ErrorKind::NetworkError
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends one request and returns the raw answer.
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(TransportResponse::new(200, "").is_success());
        assert!(!TransportResponse::new(200, "").is_retryable());

        assert!(TransportResponse::new(429, "").is_retryable());
        assert!(TransportResponse::new(500, "").is_retryable());
        assert!(TransportResponse::new(503, "").is_retryable());

        let bad_request = TransportResponse::new(400, "");
        assert!(!bad_request.is_success());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_json_body() {
        let response = TransportResponse::json_ok(&json!({"ok": true}));
        let value: Value = response.json().unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert!(TransportResponse::new(200, "not json").json::<Value>().is_err());
    }

    #[test]
    fn test_retry_after() {
        let response = TransportResponse::new(429, "slow down").with_retry_after("3");
        assert_eq!(response.retry_after.as_deref(), Some("3"));
        assert_eq!(response.text(), "slow down");
    }
}
