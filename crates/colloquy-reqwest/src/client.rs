//! Reqwest-based HTTP transport for chat completion calls.

use std::sync::Arc;
use std::time::Instant;

use colloquy_core::transport::RETRY_AFTER;
use colloquy_core::{ChatRequest, ChatTransport, TransportResponse};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;

use crate::{Error, ReqwestConfig, Result};

/// Tracing target for reqwest transport operations.
pub const TRACING_TARGET: &str = "colloquy_reqwest::client";

/// Inner transport state shared between clones.
struct ReqwestTransportInner {
    http: Client,
    permits: Semaphore,
    config: ReqwestConfig,
}

/// Pooled HTTP transport with a bounded number of requests in flight.
///
/// At most `max_connections` requests are sent at once; further callers wait for a
/// slot. Every request carries the resolved key both as `Authorization: Bearer` and
/// as an `api-key` header.
///
/// # Examples
///
/// ```rust,ignore
/// use colloquy_reqwest::{ReqwestConfig, ReqwestTransport};
///
/// let transport = ReqwestTransport::new(ReqwestConfig::from(&llm_config))?;
/// let response = transport.send(&request).await?;
/// ```
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<ReqwestTransportInner>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.inner.config)
            .field("available", &self.inner.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Creates a new transport with the given configuration.
    pub fn new(config: ReqwestConfig) -> Result<Self> {
        let timeout = config.effective_timeout();
        let max_connections = config.effective_max_connections();
        let user_agent = config.effective_user_agent();

        tracing::debug!(
            target: TRACING_TARGET,
            timeout_ms = timeout.as_millis(),
            max_connections,
            "Creating reqwest transport"
        );

        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_connections)
            .user_agent(&user_agent)
            .build()?;

        let inner = ReqwestTransportInner {
            http,
            permits: Semaphore::new(max_connections),
            config,
        };

        tracing::info!(
            target: TRACING_TARGET,
            max_connections,
            "Reqwest transport created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Gets the transport configuration.
    pub fn config(&self) -> &ReqwestConfig {
        &self.inner.config
    }

    /// Stops accepting requests. Calls waiting for a slot fail immediately.
    pub fn close(&self) {
        self.inner.permits.close();
        tracing::debug!(target: TRACING_TARGET, "Reqwest transport closed");
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    async fn send_inner(&self, request: &ChatRequest) -> Result<TransportResponse> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Closed)?;

        let started = Instant::now();
        let body = serde_json::to_vec(&request.body)?;

        let http_response = self
            .inner
            .http
            .post(request.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&request.api_key)
            .header("api-key", &request.api_key)
            .body(body)
            .send()
            .await?;

        let status = http_response.status().as_u16();
        let retry_after = http_response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = http_response.bytes().await?;

        tracing::debug!(
            target: TRACING_TARGET,
            status_code = status,
            elapsed_ms = started.elapsed().as_millis(),
            body_bytes = body.len(),
            "Chat completion call finished"
        );

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait::async_trait]
impl ChatTransport for ReqwestTransport {
    async fn send(&self, request: &ChatRequest) -> colloquy_core::Result<TransportResponse> {
        self.send_inner(request).await.map_err(Into::into)
    }
}
