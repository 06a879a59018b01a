//! Internal error types for colloquy-reqwest.

use thiserror::Error;

/// Result type alias for colloquy-reqwest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Internal error type for colloquy-reqwest operations.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The transport was closed by teardown.
    #[error("transport is closed")]
    Closed,
}

impl From<Error> for colloquy_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Reqwest(e) => {
                if e.is_timeout() {
                    colloquy_core::Error::timeout()
                        .with_message(e.to_string())
                        .with_source(e)
                } else if e.is_connect() {
                    colloquy_core::Error::network_error()
                        .with_message("Connection failed")
                        .with_source(e)
                } else if e.is_builder() {
                    colloquy_core::Error::configuration()
                        .with_message(e.to_string())
                        .with_source(e)
                } else {
                    colloquy_core::Error::network_error()
                        .with_message(e.to_string())
                        .with_source(e)
                }
            }
            Error::Serde(e) => colloquy_core::Error::serialization()
                .with_message(e.to_string())
                .with_source(e),
            Error::Closed => {
                colloquy_core::Error::configuration().with_message("Transport is closed")
            }
        }
    }
}
