//! Scripted transport for testing.
//!
//! # Feature Flag
//!
//! This module is only available when the `test-utils` feature is enabled:
//!
//! ```toml
//! [dev-dependencies]
//! colloquy-engine = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_engine::mock::MockTransport;
//!
//! let transport = MockTransport::rate_limited_once("OK", TokenUsage::new(10, 5));
//! let engine = BatchEngine::new(config, transport.clone())?;
//! engine.run_batch(&sequences).await;
//! assert_eq!(transport.request_count(), 2 * sequences.len());
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use colloquy_core::{ChatRequest, ChatTransport, Error, Result, TokenUsage, TransportResponse};
use serde_json::{Value, json};

type Responder = dyn Fn(&ChatRequest, usize) -> Result<TransportResponse> + Send + Sync;

/// Builds a minimal successful chat completion body.
pub fn completion_body(content: &str, usage: TokenUsage) -> Value {
    json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.total(),
        }
    })
}

/// Last user message text of a request body, whether plain or multimodal.
pub fn last_user_text(request: &ChatRequest) -> Option<String> {
    let message = request.body["messages"].as_array()?.last()?;
    match &message["content"] {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find_map(|part| part["text"].as_str())
            .map(str::to_owned),
        _ => None,
    }
}

/// Transport replying through a closure and recording every request.
///
/// The closure receives the request and the zero-based call number. Clones share
/// the recorded requests.
#[derive(Clone)]
pub struct MockTransport {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    latency: Duration,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.request_count())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Creates a transport answering with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest, usize) -> Result<TransportResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    /// Answers every request with `content` and `usage`.
    pub fn always_ok(content: impl Into<String>, usage: TokenUsage) -> Self {
        let body = completion_body(&content.into(), usage);
        Self::new(move |_, _| Ok(TransportResponse::json_ok(&body)))
    }

    /// Answers with `"<prefix><last user message>"`.
    pub fn echo(prefix: impl Into<String>, usage: TokenUsage) -> Self {
        let prefix = prefix.into();
        Self::new(move |request, _| {
            let text = last_user_text(request).unwrap_or_default();
            let body = completion_body(&format!("{prefix}{text}"), usage);
            Ok(TransportResponse::json_ok(&body))
        })
    }

    /// Answers 429 the first time a request body is seen, then `content`.
    pub fn rate_limited_once(content: impl Into<String>, usage: TokenUsage) -> Self {
        let body = completion_body(&content.into(), usage);
        let seen = Mutex::new(HashSet::new());
        Self::new(move |request, _| {
            let first_time = seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(request.body.to_string());
            Ok(if first_time {
                TransportResponse::new(429, "rate limited")
            } else {
                TransportResponse::json_ok(&body)
            })
        })
    }

    /// Fails every request with a timeout.
    pub fn timing_out() -> Self {
        Self::new(|_, _| Err(Error::timeout().with_message("operation timed out")))
    }

    /// Delays every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<ChatRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.recorded().clone()
    }

    /// Number of requests sent so far.
    pub fn request_count(&self) -> usize {
        self.recorded().len()
    }
}

#[async_trait::async_trait]
impl ChatTransport for MockTransport {
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse> {
        let call = {
            let mut requests = self.recorded();
            requests.push(request.clone());
            requests.len() - 1
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        (self.responder)(request, call)
    }
}
