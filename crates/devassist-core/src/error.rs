use core::result::Result as CoreResult;
use core::time::Duration;
use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;
use toml::ser::Error as TomlSerError;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// Result type for key-value store operations.
pub type StoreResult<T> = CoreResult<T, StoreError>;

/// Errors that can occur in the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// TOML serialization failed.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] TomlSerError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The backing key-value store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a provider call failed.
///
/// Adapters classify every vendor failure into exactly one of these kinds;
/// the orchestrator's retry policy only ever sees this enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The vendor throttled the request.
    #[error("Rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited {
        /// Delay requested by the vendor, when it sent one.
        retry_after: Option<Duration>,
    },

    /// The API key was rejected.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The requested model does not exist or is no longer served.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Any other failure, including timeouts and transport errors.
    #[error("Provider error: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Whether the same provider may be retried after this error.
    ///
    /// Only rate limiting is transient; everything else moves on to fallback.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Delay the vendor asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after.map_or_else(String::new, |delay| {
        format!(" (retry after {}s)", delay.as_secs_f64())
    })
}

/// Errors raised by a key-value store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value had an unexpected shape.
    #[error("Corrupt store entry at {key}: {reason}")]
    Corrupt {
        /// Key holding the bad value.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}
