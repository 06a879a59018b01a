//! HTTP-backed implementation of [`LlmBackend`].

use std::fmt;
use std::sync::Arc;

use colloquy_core::{
    BatchOutcome, Error, KeyResolver, LlmBackend, PromptSequence, RemoteLlmConfig, Result,
    StaticKeyResolver,
};
use colloquy_reqwest::{ReqwestConfig, ReqwestTransport};

use crate::batch::BatchEngine;

/// Tracing target for backend lifecycle events.
pub const TRACING_TARGET: &str = "colloquy_engine::backend";

/// Resources held between `setup` and `teardown`.
struct Session {
    transport: ReqwestTransport,
    engine: BatchEngine,
}

/// Remote completion backend using the reqwest transport.
///
/// `setup` builds the pooled HTTP client; `teardown` closes it. Batches can only run
/// in between.
pub struct RemoteLlmBackend {
    config: RemoteLlmConfig,
    resolver: Arc<dyn KeyResolver>,
    session: Option<Session>,
}

impl fmt::Debug for RemoteLlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLlmBackend")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl RemoteLlmBackend {
    /// Creates a backend after validating `config`.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resolver: Arc::new(StaticKeyResolver),
            session: None,
        })
    }

    /// Replaces the key resolver. Takes effect at the next `setup`.
    #[must_use]
    pub fn with_key_resolver<R>(mut self, resolver: R) -> Self
    where
        R: KeyResolver + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Gets the backend configuration.
    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    /// True between `setup` and `teardown`.
    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }
}

#[async_trait::async_trait]
impl LlmBackend for RemoteLlmBackend {
    async fn setup(&mut self) -> Result<()> {
        if self.session.is_some() {
            tracing::debug!(target: TRACING_TARGET, "Backend already set up");
            return Ok(());
        }

        let transport = ReqwestTransport::new(ReqwestConfig::from(&self.config))?;
        let engine = BatchEngine::new(self.config.clone(), transport.clone())?
            .with_shared_key_resolver(Arc::clone(&self.resolver));

        tracing::info!(
            target: TRACING_TARGET,
            inference_url = %self.config.inference_url,
            concurrency_limit = self.config.concurrency_limit,
            "Remote backend ready"
        );

        self.session = Some(Session { transport, engine });
        Ok(())
    }

    async fn complete_batch(&self, sequences: &[PromptSequence]) -> Result<BatchOutcome> {
        let session = self.session.as_ref().ok_or_else(|| {
            Error::configuration().with_message("backend is not set up; call setup first")
        })?;

        Ok(session.engine.run_batch(sequences).await)
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.transport.close();
            tracing::info!(target: TRACING_TARGET, "Remote backend released");
        }
        Ok(())
    }
}
