//! Error types for cluster module

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<breakwatch_core::Error> for Error {
    fn from(err: breakwatch_core::Error) -> Self {
        match err {
            breakwatch_core::Error::Serialization(e) => Self::Serialization(e),
            breakwatch_core::Error::Configuration(msg) => Self::Configuration(msg),
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
