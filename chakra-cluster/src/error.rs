//! Error types for the cluster layer

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<Error> for chakra_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout(msg) | Error::Redis(msg) | Error::Bus(msg) => Self::Unavailable(msg),
            Error::Configuration(msg) => Self::InvalidInput(msg),
            Error::Serialization(e) => Self::Serialization(e),
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
