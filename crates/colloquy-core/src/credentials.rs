//! Credential resolution.

use url::Url;

use crate::Result;

/// Turns a raw key reference into the literal credential presented to an endpoint.
///
/// Providers with key-exchange schemes implement this; the engine calls it once per
/// attempt so short-lived credentials are refreshed between retries.
#[async_trait::async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolves `raw_key` for requests sent to `endpoint`.
    async fn resolve(&self, raw_key: &str, endpoint: &Url) -> Result<String>;
}

/// Resolver that presents the configured key unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticKeyResolver;

#[async_trait::async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, raw_key: &str, _endpoint: &Url) -> Result<String> {
        Ok(raw_key.to_owned())
    }
}
