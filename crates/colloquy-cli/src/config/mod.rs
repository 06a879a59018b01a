//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── llm: RemoteLlmConfig   # Endpoint, key, limits, pricing, retries
//! └── io: IoConfig           # Input sequences, report output
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.
//!
//! # Example
//!
//! ```bash
//! colloquy --inference-url "https://api.deepinfra.com/v1/openai/chat/completions" \
//!     --inference-config '{"model": "google/gemma-2-9b-it"}' \
//!     --input-cpm 0.06 --output-cpm 0.06 --input sequences.json
//!
//! # Or via environment variables
//! INFERENCE_URL="https://..." LLM_API_KEY="..." colloquy -i sequences.json
//! ```

mod io;

use std::process;

use anyhow::Context;
use clap::Parser;
use colloquy_core::RemoteLlmConfig;
pub use io::IoConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "colloquy")]
#[command(about = "Run a batch of multi-turn chat completions")]
#[command(version)]
pub struct Cli {
    /// Remote completion endpoint configuration.
    #[clap(flatten)]
    pub llm: RemoteLlmConfig,

    /// Input and output locations.
    #[clap(flatten)]
    pub io: IoConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.validate().context("invalid llm configuration")?;
        Ok(())
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            inference_url = %self.llm.inference_url,
            provider = ?self.llm.provider,
            concurrency_limit = self.llm.concurrency_limit,
            timeout_secs = self.llm.timeout_secs,
            max_attempts = self.llm.max_attempts,
            attempt_budget = %self.llm.attempt_budget,
            input_cpm = self.llm.input_cpm,
            output_cpm = self.llm.output_cpm,
            context_length = ?self.llm.context_length,
            is_multimodal = self.llm.is_multimodal,
            "LLM configuration"
        );

        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            inference_params = self.llm.inference_config.len(),
            input = %self.io.input.display(),
            output = ?self.io.output,
            "I/O configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use colloquy_core::AttemptBudget;

    use super::*;

    #[test]
    fn test_parse_minimal_arguments() {
        let cli = Cli::try_parse_from([
            "colloquy",
            "--inference-url",
            "https://api.example.com/v1/chat/completions",
            "--api-key",
            "sk-test",
            "--input",
            "sequences.json",
        ])
        .unwrap();

        assert_eq!(cli.llm.concurrency_limit, 16);
        assert_eq!(cli.llm.attempt_budget, AttemptBudget::Uniform);
        assert!(cli.llm.inference_config.is_empty());
        assert!(cli.io.output.is_none());
        assert!(!cli.io.pretty);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_full_arguments() {
        let cli = Cli::try_parse_from([
            "colloquy",
            "--inference-url",
            "https://api.example.com/v1/chat/completions",
            "--api-key",
            "sk-test",
            "--inference-config",
            r#"{"model": "google/gemma-2-9b-it", "temperature": 0.2}"#,
            "--provider",
            "deepinfra",
            "--input-cpm",
            "0.06",
            "--output-cpm",
            "0.06",
            "--attempt-budget",
            "scaled-by-index",
            "--multimodal",
            "-i",
            "in.json",
            "-o",
            "out.json",
            "--pretty",
        ])
        .unwrap();

        assert_eq!(cli.llm.inference_config.len(), 2);
        assert_eq!(cli.llm.provider.as_deref(), Some("deepinfra"));
        assert_eq!(cli.llm.attempt_budget, AttemptBudget::ScaledByIndex);
        assert!(cli.llm.is_multimodal);
        assert!(cli.io.pretty);
    }

    #[test]
    fn test_rejects_non_object_inference_config() {
        let result = Cli::try_parse_from([
            "colloquy",
            "--inference-url",
            "https://api.example.com/v1/chat/completions",
            "--api-key",
            "sk-test",
            "--inference-config",
            "[1, 2]",
            "--input",
            "sequences.json",
        ]);
        assert!(result.is_err());
    }
}
