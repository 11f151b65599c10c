//! In-memory credential storage implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{CredentialStore, Secret, StoreError};

/// In-memory credential store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: HashMap<String, Secret>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.len())
            .finish()
    }
}

fn poisoned(e: impl std::fmt::Display) -> StoreError {
    StoreError::BackendError {
        message: format!("lock poisoned: {}", e),
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.clear();
        Ok(())
    }
}
