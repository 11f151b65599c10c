//! Error types for shelfsync.
//!
//! [`ApiError`] is the taxonomy every protocol call reports. It is what
//! escalates out of the auth client and the library fetcher, and what the sync
//! service turns into a user-facing message. [`ShelfsyncError`] wraps the
//! remaining module errors for callers that want a single type.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Failure of a call against the remote service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Transport-level failure (timeout, DNS, connection reset).
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// The response did not match the expected schema.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// No valid access token is available.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Anything else, with its message.
    #[error("{message}")]
    Unknown { message: String },
}

impl ApiError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Short human-readable text for display. Never includes response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { .. } => "Network unavailable".to_string(),
            Self::HttpStatus { message, .. } => message.clone(),
            Self::MalformedResponse { .. } => "Unexpected response from server".to_string(),
            Self::NotAuthenticated => "Not authenticated".to_string(),
            Self::Unknown { message } if message.is_empty() => "Unknown error".to_string(),
            Self::Unknown { message } => message.clone(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Unknown {
            message: err.to_string(),
        }
    }
}

/// Top-level error type encompassing all shelfsync errors.
#[derive(Debug, Error)]
pub enum ShelfsyncError {
    /// Error from a remote call.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Error from credential storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the library cache.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Error building the HTTP transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
