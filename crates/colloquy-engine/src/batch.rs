//! Batch orchestrator: fans prompt sequences out to concurrent drivers.

use std::fmt;
use std::sync::Arc;

use colloquy_core::{
    BatchOutcome, ChatTransport, KeyResolver, PromptSequence, RemoteLlmConfig, Result,
    StaticKeyResolver,
};
use futures_util::future::join_all;
use jiff::Timestamp;
use tracing::Instrument;
use uuid::Uuid;

use crate::driver::ConversationDriver;
use crate::executor::RequestExecutor;
use crate::gate::BackoffGate;
use crate::metrics::{BatchTelemetry, StatusReporter};

/// Tracing target for batch orchestration.
pub const TRACING_TARGET: &str = "colloquy_engine::batch";

/// Runs batches of prompt sequences against one transport.
///
/// Every call to [`run_batch`](Self::run_batch) gets its own backoff gate,
/// telemetry and status reporter. Individual conversation failures never fail the
/// batch; they show up as empty response lists.
///
/// # Examples
///
/// ```rust,ignore
/// use colloquy_engine::BatchEngine;
///
/// let engine = BatchEngine::new(config, transport)?;
/// let outcome = engine.run_batch(&sequences).await;
/// let (responses, total_cost) = outcome.into_parts();
/// ```
#[derive(Clone)]
pub struct BatchEngine {
    config: Arc<RemoteLlmConfig>,
    transport: Arc<dyn ChatTransport>,
    resolver: Arc<dyn KeyResolver>,
}

impl fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchEngine {
    /// Creates an engine after validating `config`.
    pub fn new<T>(config: RemoteLlmConfig, transport: T) -> Result<Self>
    where
        T: ChatTransport + 'static,
    {
        Self::from_shared(config, Arc::new(transport))
    }

    /// Creates an engine from an already shared transport.
    pub fn from_shared(config: RemoteLlmConfig, transport: Arc<dyn ChatTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
            resolver: Arc::new(StaticKeyResolver),
        })
    }

    /// Replaces the key resolver.
    #[must_use]
    pub fn with_key_resolver<R>(mut self, resolver: R) -> Self
    where
        R: KeyResolver + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Replaces the key resolver with a shared one.
    #[must_use]
    pub fn with_shared_key_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Gets the engine configuration.
    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    /// Runs every sequence concurrently and collects the results in input order.
    pub async fn run_batch(&self, sequences: &[PromptSequence]) -> BatchOutcome {
        let batch_id = Uuid::now_v7();
        let started_at = Timestamp::now();

        let Some(first) = sequences.first() else {
            tracing::info!(target: TRACING_TARGET, batch_id = %batch_id, "Empty batch");
            return BatchOutcome::new(batch_id, Vec::new(), started_at, Timestamp::now());
        };

        let expected_turns = i64::try_from(sequences.len() * first.len()).unwrap_or(i64::MAX);
        let telemetry = Arc::new(BatchTelemetry::new(expected_turns));

        tracing::info!(
            target: TRACING_TARGET,
            batch_id = %batch_id,
            sequences = sequences.len(),
            expected_turns,
            "Batch started"
        );

        let reporter = StatusReporter::spawn(
            batch_id,
            Arc::clone(&telemetry),
            self.config.status_interval(),
        );

        let executor = RequestExecutor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
            Arc::clone(&self.resolver),
            BackoffGate::new(),
            Arc::clone(&telemetry),
        );
        let driver = ConversationDriver::new(&executor);

        let span = tracing::info_span!(target: TRACING_TARGET, "batch", batch_id = %batch_id);
        let runs = join_all(
            sequences
                .iter()
                .enumerate()
                .map(|(index, sequence)| driver.run(sequence, index)),
        )
        .instrument(span)
        .await;

        reporter.stop().await;

        let outcomes = runs.into_iter().map(|run| run.into_outcome()).collect();
        let outcome = BatchOutcome::new(batch_id, outcomes, started_at, Timestamp::now());

        tracing::info!(
            target: TRACING_TARGET,
            batch_id = %batch_id,
            completed = outcome.completed(),
            failed = outcome.failed(),
            total_cost = outcome.total_cost,
            input_tokens = outcome.usage().input_tokens,
            output_tokens = outcome.usage().output_tokens,
            retries = telemetry.total_retries(),
            elapsed_ms = i64::try_from(outcome.elapsed().as_millis()).unwrap_or(i64::MAX),
            "Batch finished"
        );

        outcome
    }
}
