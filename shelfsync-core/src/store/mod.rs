//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for credential storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select backend based on availability
//!
//! The store is a plain key-value map. It has no knowledge of what a session
//! looks like; [`TokenSession`](crate::session::TokenSession) serializes the
//! session record into a single value under [`SESSION_KEY`].
//!
//! # Example
//!
//! ```rust,ignore
//! use shelfsync_core::store::{Secret, CredentialStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.put("session", &Secret::new("{...}")).await.unwrap();
//!
//! let retrieved = store.get("session").await.unwrap();
//! assert_eq!(retrieved.unwrap().expose(), "{...}");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// Key under which the serialized session record is stored.
pub const SESSION_KEY: &str = "session";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
/// The backing buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the entry was denied.
    #[error("access denied to credential: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over credential storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a value at the given key.
    ///
    /// Overwrites any existing value.
    async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a value by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry owned by this store.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).put(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).put(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

/// Create a credential store with automatic backend selection.
///
/// - If `prefer_keyring` is `true` and the `keyring-store` feature is enabled:
///   - Attempts to create a [`KeyringStore`] owning [`SESSION_KEY`]
///   - Falls back to [`MemoryStore`] with a warning if keyring is unavailable
/// - Otherwise: Returns [`MemoryStore`]
///
/// # Example
///
/// ```rust,ignore
/// use shelfsync_core::store::create_store;
///
/// // Try to use keyring, fallback to memory if unavailable
/// let store = create_store(true);
/// ```
pub fn create_store(prefer_keyring: bool) -> Box<dyn CredentialStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new("shelfsync") {
            Ok(store) => {
                tracing::info!("Using OS keyring for credential storage");
                return Box::new(store.with_keys([SESSION_KEY]));
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), falling back to memory store. \
                     Sessions will not persist across restarts.",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested but keyring-store feature not enabled. \
             Using memory store. Sessions will not persist across restarts."
        );
    }

    tracing::debug!("Using in-memory credential storage");
    Box::new(MemoryStore::new())
}
