//! Request executor: one chat completion per conversation turn, with retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use colloquy_core::{
    ChatCompletionResponse, ChatRequest, ChatTransport, Conversation, Error, ErrorKind,
    KeyResolver, RemoteLlmConfig, TokenUsage, Turn, build_request_body,
};
use thiserror::Error;

use crate::gate::BackoffGate;
use crate::metrics::BatchTelemetry;

/// Tracing target for request execution.
pub const TRACING_TARGET: &str = "colloquy_engine::executor";

/// Rough characters-per-token ratio used for context window estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Assistant response.
    pub content: String,
    /// Tokens reported by the provider.
    pub usage: TokenUsage,
    /// Money spent on this turn.
    pub cost: f64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Permanent failure of one turn. A failed turn costs nothing.
#[derive(Debug, Error)]
pub enum TurnFailure {
    /// The request timed out.
    #[error("request timed out")]
    Timeout(#[source] Error),
    /// The connection failed or was interrupted.
    #[error("connection failed")]
    Connection(#[source] Error),
    /// Any other transport failure.
    #[error("transport failed")]
    Transport(#[source] Error),
    /// The request body could not be built.
    #[error("invalid request")]
    InvalidRequest(#[source] Error),
    /// Non-retryable, non-success status.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },
    /// The success response could not be used.
    #[error("invalid response")]
    InvalidResponse(#[source] Error),
    /// The key resolver failed.
    #[error("credential resolution failed")]
    Credentials(#[source] Error),
    /// Every attempt hit a rate limit or server error.
    #[error("no success after {attempts} attempts")]
    AttemptsExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl TurnFailure {
    fn from_transport(error: Error) -> Self {
        match error.kind {
            ErrorKind::Timeout => Self::Timeout(error),
            ErrorKind::NetworkError => Self::Connection(error),
            _ => Self::Transport(error),
        }
    }
}

/// Computes how long to keep the gate closed after a retryable response.
///
/// A `Retry-After` value in (possibly fractional) seconds wins; otherwise the wait is
/// `2^attempt` seconds, capped at `cap`. `attempt` counts from zero.
pub fn backoff_delay(retry_after: Option<&str>, attempt: u32, cap: Duration) -> Duration {
    retry_after
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_else(|| {
            let secs = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
            Duration::from_secs(secs).min(cap)
        })
}

/// Estimated prompt tokens of the given turns.
pub fn estimate_tokens(turns: &[Turn]) -> usize {
    let chars: usize = turns.iter().map(|turn| turn.content.chars().count()).sum();
    chars / CHARS_PER_TOKEN
}

/// Issues the request for one turn, retrying rate limits and server errors.
///
/// All executors of a batch share one [`BackoffGate`]: a retryable answer to any of
/// them pauses every request until the cooldown ends.
#[derive(Clone)]
pub struct RequestExecutor {
    config: Arc<RemoteLlmConfig>,
    transport: Arc<dyn ChatTransport>,
    resolver: Arc<dyn KeyResolver>,
    gate: BackoffGate,
    telemetry: Arc<BatchTelemetry>,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates an executor bound to one batch's gate and telemetry.
    pub fn new(
        config: Arc<RemoteLlmConfig>,
        transport: Arc<dyn ChatTransport>,
        resolver: Arc<dyn KeyResolver>,
        gate: BackoffGate,
        telemetry: Arc<BatchTelemetry>,
    ) -> Self {
        Self {
            config,
            transport,
            resolver,
            gate,
            telemetry,
        }
    }

    /// Returns the batch telemetry.
    pub fn telemetry(&self) -> &BatchTelemetry {
        &self.telemetry
    }

    /// Returns the shared gate.
    pub fn gate(&self) -> &BackoffGate {
        &self.gate
    }

    /// Requests the next assistant turn for `conversation`.
    ///
    /// The outbound payload honors the memory rule of
    /// [`Conversation::outbound_turns`].
    pub async fn execute(
        &self,
        conversation: &Conversation,
        sequence_index: usize,
    ) -> Result<Completion, TurnFailure> {
        let result = self.execute_inner(conversation, sequence_index).await;

        match &result {
            Ok(completion) => tracing::debug!(
                target: TRACING_TARGET,
                sequence_index,
                attempts = completion.attempts,
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                cost = completion.cost,
                "Turn completed"
            ),
            Err(TurnFailure::AttemptsExhausted { attempts }) => tracing::error!(
                target: TRACING_TARGET,
                sequence_index,
                attempts,
                "Attempt budget exhausted"
            ),
            Err(failure) => tracing::error!(
                target: TRACING_TARGET,
                sequence_index,
                error = %failure,
                "Turn failed"
            ),
        }

        result
    }

    async fn execute_inner(
        &self,
        conversation: &Conversation,
        sequence_index: usize,
    ) -> Result<Completion, TurnFailure> {
        let turns = conversation.outbound_turns();
        self.check_context_window(turns, sequence_index);

        let body = build_request_body(
            turns,
            &self.config.inference_config,
            self.config.provider.as_deref(),
            self.config.is_multimodal,
        )
        .map_err(TurnFailure::InvalidRequest)?;

        let max_attempts = self.config.attempts_for(sequence_index);
        for attempt in 0..max_attempts {
            self.gate.wait().await;

            let api_key = self
                .resolver
                .resolve(&self.config.api_key, &self.config.inference_url)
                .await
                .map_err(TurnFailure::Credentials)?;
            let request =
                ChatRequest::new(self.config.inference_url.clone(), api_key, body.clone());

            let response = self
                .transport
                .send(&request)
                .await
                .map_err(TurnFailure::from_transport)?;

            if response.is_retryable() {
                self.telemetry.record_retry();
                let wait = backoff_delay(
                    response.retry_after.as_deref(),
                    attempt,
                    self.config.max_backoff(),
                );

                tracing::debug!(
                    target: TRACING_TARGET,
                    sequence_index,
                    attempt,
                    status_code = response.status,
                    wait_secs = wait.as_secs_f64(),
                    "Retryable status, pausing all requests"
                );

                self.gate.cooldown(wait).await;
                continue;
            }

            if !response.is_success() {
                return Err(TurnFailure::UnexpectedStatus {
                    status: response.status,
                    body: response.text(),
                });
            }

            let parsed = ChatCompletionResponse::from_slice(&response.body)
                .map_err(TurnFailure::InvalidResponse)?;
            let content = parsed.content().map_err(TurnFailure::InvalidResponse)?;
            if content.is_empty() {
                return Err(TurnFailure::InvalidResponse(
                    Error::external_error().with_message("response content is empty"),
                ));
            }

            let usage = parsed.usage();
            return Ok(Completion {
                content: content.to_owned(),
                usage,
                cost: self.config.cost(usage),
                attempts: attempt + 1,
            });
        }

        Err(TurnFailure::AttemptsExhausted {
            attempts: max_attempts,
        })
    }

    fn check_context_window(&self, turns: &[Turn], sequence_index: usize) {
        let Some(context_length) = self.config.context_length else {
            return;
        };

        let estimated_tokens = estimate_tokens(turns);
        if estimated_tokens > context_length as usize {
            tracing::warn!(
                target: TRACING_TARGET,
                sequence_index,
                estimated_tokens,
                context_length,
                "Payload likely exceeds the context window"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use colloquy_core::{StaticKeyResolver, TransportResponse};
    use serde_json::json;
    use tokio::time::Instant;
    use url::Url;

    use super::*;
    use crate::mock::{MockTransport, completion_body};

    fn config() -> RemoteLlmConfig {
        RemoteLlmConfig::new(
            Url::parse("https://api.example.com/v1/chat/completions").unwrap(),
            "sk-test",
        )
        .with_pricing(1.0, 1.0)
    }

    fn executor(config: RemoteLlmConfig, transport: &MockTransport) -> RequestExecutor {
        RequestExecutor::new(
            Arc::new(config),
            Arc::new(transport.clone()),
            Arc::new(StaticKeyResolver),
            BackoffGate::new(),
            Arc::new(BatchTelemetry::new(1)),
        )
    }

    fn hello() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.push_user("Hello", true);
        conversation
    }

    #[test]
    fn test_backoff_delay() {
        let cap = Duration::from_secs(600);
        assert_eq!(backoff_delay(None, 0, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(None, 3, cap), Duration::from_secs(8));
        assert_eq!(backoff_delay(None, 40, cap), cap);
        assert_eq!(backoff_delay(None, 200, cap), cap);

        assert_eq!(backoff_delay(Some("7"), 5, cap), Duration::from_secs(7));
        assert_eq!(backoff_delay(Some(" 1.5 "), 0, cap), Duration::from_millis(1500));
        assert_eq!(
            backoff_delay(Some("Wed, 21 Oct 2015 07:28:00 GMT"), 2, cap),
            Duration::from_secs(4)
        );
        assert_eq!(backoff_delay(Some("-3"), 1, cap), Duration::from_secs(2));
    }

    #[test]
    fn test_estimate_tokens() {
        let turns = vec![Turn::user("a".repeat(40), true), Turn::assistant("b".repeat(8))];
        assert_eq!(estimate_tokens(&turns), 12);
    }

    #[tokio::test]
    async fn test_success_computes_cost() {
        let transport = MockTransport::always_ok("OK", TokenUsage::new(10, 5));
        let executor = executor(config(), &transport);

        let completion = executor.execute(&hello(), 0).await.unwrap();
        assert_eq!(completion.content, "OK");
        assert_eq!(completion.usage, TokenUsage::new(10, 5));
        assert_eq!(completion.attempts, 1);
        assert!((completion.cost - 0.000_015).abs() < 1e-12);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].api_key, "sk-test");
        assert_eq!(
            requests[0].body["messages"],
            json!([{"role": "user", "content": "Hello"}])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let transport = MockTransport::rate_limited_once("OK", TokenUsage::new(10, 5));
        let executor = executor(config(), &transport);
        let started = Instant::now();

        let completion = executor.execute(&hello(), 0).await.unwrap();

        assert_eq!(completion.content, "OK");
        assert_eq!(completion.attempts, 2);
        assert_eq!(executor.telemetry().total_retries(), 1);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(executor.gate().is_open());
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_header_sets_wait() {
        let transport = MockTransport::new(|_, call| {
            Ok(if call == 0 {
                TransportResponse::new(503, "busy").with_retry_after("30")
            } else {
                TransportResponse::json_ok(&completion_body("OK", TokenUsage::new(1, 1)))
            })
        });
        let executor = executor(config(), &transport);
        let started = Instant::now();

        executor.execute(&hello(), 0).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let transport = MockTransport::timing_out();
        let executor = executor(config(), &transport);

        let failure = executor.execute(&hello(), 0).await.unwrap_err();
        assert!(matches!(failure, TurnFailure::Timeout(_)));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(executor.telemetry().total_retries(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_retried() {
        let transport = MockTransport::new(|_, _| Err(Error::network_error()));
        let executor = executor(config(), &transport);

        let failure = executor.execute(&hello(), 0).await.unwrap_err();
        assert!(matches!(failure, TurnFailure::Connection(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let transport = MockTransport::new(|_, _| Ok(TransportResponse::new(400, "bad model")));
        let executor = executor(config(), &transport);

        let failure = executor.execute(&hello(), 0).await.unwrap_err();
        assert!(matches!(
            failure,
            TurnFailure::UnexpectedStatus { status: 400, ref body } if body == "bad model"
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_responses_fail() {
        let transport = MockTransport::new(|_, _| Ok(TransportResponse::new(200, "{}")));
        let failure = executor(config(), &transport)
            .execute(&hello(), 0)
            .await
            .unwrap_err();
        assert!(matches!(failure, TurnFailure::InvalidResponse(_)));

        let transport = MockTransport::always_ok("", TokenUsage::new(3, 0));
        let failure = executor(config(), &transport)
            .execute(&hello(), 0)
            .await
            .unwrap_err();
        assert!(matches!(failure, TurnFailure::InvalidResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let transport = MockTransport::new(|_, _| Ok(TransportResponse::new(429, "")));
        let config = config().with_attempts(3, colloquy_core::AttemptBudget::ScaledByIndex);
        let executor = executor(config, &transport);
        let started = Instant::now();

        let failure = executor.execute(&hello(), 2).await.unwrap_err();
        assert!(matches!(failure, TurnFailure::AttemptsExhausted { attempts: 5 }));
        assert_eq!(transport.request_count(), 5);
        assert_eq!(executor.telemetry().total_retries(), 5);
        // 1 + 2 + 4 + 8 + 16 seconds of cooldown.
        assert!(started.elapsed() >= Duration::from_secs(31));
        assert!(executor.gate().is_open());
    }

    #[tokio::test]
    async fn test_credentials_failure_is_permanent() {
        struct Rejecting;

        #[async_trait::async_trait]
        impl KeyResolver for Rejecting {
            async fn resolve(&self, _: &str, _: &Url) -> colloquy_core::Result<String> {
                Err(Error::authentication().with_message("key exchange failed"))
            }
        }

        let transport = MockTransport::always_ok("OK", TokenUsage::new(1, 1));
        let executor = RequestExecutor::new(
            Arc::new(config()),
            Arc::new(transport.clone()),
            Arc::new(Rejecting),
            BackoffGate::new(),
            Arc::new(BatchTelemetry::new(1)),
        );

        let failure = executor.execute(&hello(), 0).await.unwrap_err();
        assert!(matches!(failure, TurnFailure::Credentials(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_payload_carries_params_provider_and_multimodal_content() {
        let transport = MockTransport::always_ok("OK", TokenUsage::new(1, 1));
        let config = config()
            .with_provider("deepinfra")
            .with_inference_config(
                colloquy_core::InferenceParams::new().with("model", "google/gemma-2-9b-it"),
            )
            .with_multimodal(true);

        executor(config, &transport).execute(&hello(), 0).await.unwrap();

        let body = &transport.requests()[0].body;
        assert_eq!(body["model"], "google/gemma-2-9b-it");
        assert_eq!(body["provider"], "deepinfra");
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "Hello"}]}])
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_is_sent_untruncated() {
        let transport = MockTransport::always_ok("OK", TokenUsage::new(1, 1));
        let executor = executor(config().with_context_length(1), &transport);

        let mut conversation = Conversation::new();
        conversation.push_user("Tell me about the sea", true);
        conversation.push_assistant("The sea is large");
        conversation.push_user("And the sky?", true);

        let completion = executor.execute(&conversation, 0).await.unwrap();
        assert_eq!(completion.content, "OK");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].body["messages"],
            json!([
                {"role": "user", "content": "Tell me about the sea"},
                {"role": "assistant", "content": "The sea is large"},
                {"role": "user", "content": "And the sky?"}
            ])
        );
    }
}
