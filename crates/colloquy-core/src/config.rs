//! Remote completion endpoint configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use url::Url;

use crate::completion::TokenUsage;
use crate::{Error, Result};

/// Default number of concurrent connections to the provider.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 16;

/// Default request timeout: 5 minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of attempts per turn.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Upper bound for the computed exponential backoff.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 600;

/// Default interval between periodic status reports.
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

/// How many attempts a single turn is allowed before it is declared failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AttemptBudget {
    /// Every turn gets `max_attempts`.
    #[default]
    Uniform,
    /// A turn of the sequence at index `i` gets `i + max_attempts`.
    ScaledByIndex,
}

/// Provider-specific inference parameters merged verbatim into every request body.
///
/// Typical entries are `model`, `temperature` or `max_tokens`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InferenceParams(Map<String, Value>);

impl InferenceParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing any previous value under the same key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Iterates over the parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for InferenceParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromStr for InferenceParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }

        match serde_json::from_str::<Value>(s)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::configuration()
                .with_message(format!("inference config must be a JSON object, got {other}"))),
        }
    }
}

/// Configuration for a remote, HTTP-based chat completion endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct RemoteLlmConfig {
    /// Chat completion endpoint URL
    #[cfg_attr(feature = "config", arg(long = "inference-url", env = "INFERENCE_URL"))]
    pub inference_url: Url,

    /// API key (or raw key reference handed to the key resolver)
    #[cfg_attr(
        feature = "config",
        arg(long = "api-key", env = "LLM_API_KEY", hide_env_values = true)
    )]
    pub api_key: String,

    /// Maximum number of concurrent connections to the provider
    #[cfg_attr(
        feature = "config",
        arg(long = "concurrency-limit", env = "CONCURRENCY_LIMIT", default_value = "16")
    )]
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Request timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "request-timeout", env = "REQUEST_TIMEOUT", default_value = "300")
    )]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional provider tag forwarded in the request body
    #[cfg_attr(feature = "config", arg(long = "provider", env = "LLM_PROVIDER"))]
    #[serde(default)]
    pub provider: Option<String>,

    /// Provider-specific parameters as a JSON object (e.g. '{"model": "..."}')
    #[cfg_attr(
        feature = "config",
        arg(long = "inference-config", env = "INFERENCE_CONFIG", default_value = "{}")
    )]
    #[serde(default)]
    pub inference_config: InferenceParams,

    /// Price per million input tokens
    #[cfg_attr(
        feature = "config",
        arg(long = "input-cpm", env = "INPUT_CPM", default_value = "0")
    )]
    #[serde(default)]
    pub input_cpm: f64,

    /// Price per million output tokens
    #[cfg_attr(
        feature = "config",
        arg(long = "output-cpm", env = "OUTPUT_CPM", default_value = "0")
    )]
    #[serde(default)]
    pub output_cpm: f64,

    /// Model context window in tokens, used for payload size warnings
    #[cfg_attr(feature = "config", arg(long = "context-length", env = "CONTEXT_LENGTH"))]
    #[serde(default)]
    pub context_length: Option<u32>,

    /// Send user turns as multimodal content arrays
    #[cfg_attr(feature = "config", arg(long = "multimodal", env = "LLM_MULTIMODAL"))]
    #[serde(default)]
    pub is_multimodal: bool,

    /// Base number of attempts per turn
    #[cfg_attr(
        feature = "config",
        arg(long = "max-attempts", env = "MAX_ATTEMPTS", default_value = "8")
    )]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempt budget policy
    #[cfg_attr(
        feature = "config",
        arg(long = "attempt-budget", env = "ATTEMPT_BUDGET", value_enum, default_value = "uniform")
    )]
    #[serde(default)]
    pub attempt_budget: AttemptBudget,

    /// Upper bound in seconds for the computed exponential backoff
    #[cfg_attr(
        feature = "config",
        arg(long = "max-backoff", env = "MAX_BACKOFF", default_value = "600")
    )]
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Interval in seconds between periodic status reports
    #[cfg_attr(
        feature = "config",
        arg(long = "status-interval", env = "STATUS_INTERVAL", default_value = "60")
    )]
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_max_backoff_secs() -> u64 {
    DEFAULT_MAX_BACKOFF_SECS
}

fn default_status_interval_secs() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}

impl RemoteLlmConfig {
    /// Creates a configuration with defaults for everything but the endpoint and key.
    pub fn new(inference_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            inference_url,
            api_key: api_key.into(),
            concurrency_limit: default_concurrency_limit(),
            timeout_secs: default_timeout_secs(),
            provider: None,
            inference_config: InferenceParams::default(),
            input_cpm: 0.0,
            output_cpm: 0.0,
            context_length: None,
            is_multimodal: false,
            max_attempts: default_max_attempts(),
            attempt_budget: AttemptBudget::default(),
            max_backoff_secs: default_max_backoff_secs(),
            status_interval_secs: default_status_interval_secs(),
        }
    }

    /// Set the per-million-token prices.
    #[must_use]
    pub fn with_pricing(mut self, input_cpm: f64, output_cpm: f64) -> Self {
        self.input_cpm = input_cpm;
        self.output_cpm = output_cpm;
        self
    }

    /// Set the concurrency limit.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the request timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the provider tag.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the inference parameters.
    #[must_use]
    pub fn with_inference_config(mut self, params: InferenceParams) -> Self {
        self.inference_config = params;
        self
    }

    /// Set the context length.
    #[must_use]
    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = Some(context_length);
        self
    }

    /// Enable or disable multimodal user content.
    #[must_use]
    pub fn with_multimodal(mut self, is_multimodal: bool) -> Self {
        self.is_multimodal = is_multimodal;
        self
    }

    /// Set the attempt budget.
    #[must_use]
    pub fn with_attempts(mut self, max_attempts: u32, budget: AttemptBudget) -> Self {
        self.max_attempts = max_attempts;
        self.attempt_budget = budget;
        self
    }

    /// Set the status report interval in seconds.
    #[must_use]
    pub fn with_status_interval(mut self, secs: u64) -> Self {
        self.status_interval_secs = secs;
        self
    }

    /// Returns the request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the status report interval as a Duration.
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Returns the cap applied to computed backoff waits.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Number of attempts allowed for one turn of the sequence at `sequence_index`.
    pub fn attempts_for(&self, sequence_index: usize) -> u32 {
        match self.attempt_budget {
            AttemptBudget::Uniform => self.max_attempts,
            AttemptBudget::ScaledByIndex => {
                let index = u32::try_from(sequence_index).unwrap_or(u32::MAX);
                self.max_attempts.saturating_add(index)
            }
        }
    }

    /// Computes the monetary cost of the given token usage.
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_cpm / 1_000_000.0)
            + (usage.output_tokens as f64 * self.output_cpm / 1_000_000.0)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.inference_url.scheme(), "http" | "https") {
            return Err(Error::configuration().with_message(format!(
                "inference url must use http or https, got '{}'",
                self.inference_url.scheme()
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::configuration().with_message("concurrency limit cannot be zero"));
        }
        if self.max_attempts == 0 {
            return Err(Error::configuration().with_message("max attempts cannot be zero"));
        }
        if self.status_interval_secs == 0 {
            return Err(Error::configuration().with_message("status interval cannot be zero"));
        }
        for (name, price) in [("input_cpm", self.input_cpm), ("output_cpm", self.output_cpm)] {
            if !price.is_finite() || price < 0.0 {
                return Err(Error::configuration()
                    .with_message(format!("{name} must be a non-negative number, got {price}")));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteLlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLlmConfig")
            .field("inference_url", &self.inference_url.as_str())
            .field("api_key", &"<redacted>")
            .field("concurrency_limit", &self.concurrency_limit)
            .field("timeout_secs", &self.timeout_secs)
            .field("provider", &self.provider)
            .field("inference_config", &self.inference_config)
            .field("input_cpm", &self.input_cpm)
            .field("output_cpm", &self.output_cpm)
            .field("context_length", &self.context_length)
            .field("is_multimodal", &self.is_multimodal)
            .field("max_attempts", &self.max_attempts)
            .field("attempt_budget", &self.attempt_budget)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("status_interval_secs", &self.status_interval_secs)
            .finish()
    }
}
