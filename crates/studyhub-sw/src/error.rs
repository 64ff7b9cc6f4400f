//! Worker error type.

use thiserror::Error;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl From<studyhub_net::NetError> for ServiceWorkerError {
    fn from(err: studyhub_net::NetError) -> Self {
        Self::NetworkError(err.to_string())
    }
}
