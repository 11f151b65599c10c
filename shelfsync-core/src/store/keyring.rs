//! OS keyring-backed credential storage implementation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use keyring::Entry;
use parking_lot::Mutex;

use super::{CredentialStore, Secret, StoreError};

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Platform keyrings cannot enumerate entries, so the store tracks the keys
/// it owns: every key written through [`put`](CredentialStore::put) plus any
/// key registered with [`with_keys`](Self::with_keys). [`clear`](CredentialStore::clear)
/// deletes exactly that set.
pub struct KeyringStore {
    service_name: String,
    owned_keys: Mutex<BTreeSet<String>>,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let test_key = format!("{}/__test__", service_name);
        match Entry::new(&test_key, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
                owned_keys: Mutex::new(BTreeSet::new()),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    /// Register keys persisted by a previous process so `clear` removes them.
    pub fn with_keys<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.owned_keys
            .lock()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    fn create_entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, "shelfsync").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .field("owned_keys", &self.owned_keys.lock().len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let entry = self.create_entry(key)?;

        match entry.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry for key: {}", key),
            }),
            Err(keyring::Error::NoStorageAccess(_)) => Err(StoreError::AccessDenied {
                key: key.to_string(),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        entry
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })?;
        self.owned_keys.lock().insert(key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                self.owned_keys.lock().remove(key);
                Ok(())
            }
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let keys: Vec<String> = self.owned_keys.lock().iter().cloned().collect();
        for key in keys {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
