//! Reqwest transport configuration.

use std::time::Duration;

use colloquy_core::RemoteLlmConfig;
use colloquy_core::config::{DEFAULT_CONCURRENCY_LIMIT, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

/// Configuration for the reqwest transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReqwestConfig {
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of requests in flight at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// User-Agent header to send with requests.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_connections() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

impl Default for ReqwestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_connections: default_max_connections(),
            user_agent: None,
        }
    }
}

impl ReqwestConfig {
    /// Creates a configuration with the given timeout and connection limit.
    pub fn new(timeout_secs: u64, max_connections: usize) -> Self {
        Self {
            timeout_secs,
            max_connections,
            user_agent: None,
        }
    }

    /// Set the User-Agent header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Returns the effective timeout, using default if zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// Returns the effective connection limit, never zero.
    pub fn effective_max_connections(&self) -> usize {
        self.max_connections.max(1)
    }

    /// Returns the effective user agent, using default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(Self::default_user_agent)
    }

    fn default_user_agent() -> String {
        format!("colloquy/{}", env!("CARGO_PKG_VERSION"))
    }
}

impl From<&RemoteLlmConfig> for ReqwestConfig {
    fn from(config: &RemoteLlmConfig) -> Self {
        Self::new(config.timeout_secs, config.concurrency_limit)
    }
}
