//! Library cache.
//!
//! The cache holds exactly one [`CachedLibrary`] record: the games of the last
//! successful sync and when it happened. [`FileCache`] keeps it as JSON on disk
//! and publishes each write with a rename, so a reader sees either the old
//! record or the new one. The write and the rename run together on the
//! blocking pool; dropping a pending save does not strand its temp file.
//! [`MemoryCache`] serves tests and ephemeral runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Game;

/// Format version written into every record.
pub const CACHE_VERSION: u32 = 1;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported cache version {found} (expected {CACHE_VERSION})")]
    UnsupportedVersion { found: u32 },
}

/// The persisted record of the last successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLibrary {
    pub version: u32,
    pub last_sync: DateTime<Utc>,
    pub games: Vec<Game>,
}

impl CachedLibrary {
    pub fn new(games: Vec<Game>, last_sync: DateTime<Utc>) -> Self {
        Self {
            version: CACHE_VERSION,
            last_sync,
            games,
        }
    }

    /// Whether the record is younger than `ttl` at `now`.
    ///
    /// A record exactly `ttl` old is stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_sync) < ttl
    }
}

/// Storage for the single cached library record.
#[async_trait]
pub trait LibraryCache: Send + Sync {
    /// Load the record; `Ok(None)` when nothing has been cached.
    async fn load(&self) -> Result<Option<CachedLibrary>, CacheError>;

    /// Replace the record.
    async fn save(&self, library: &CachedLibrary) -> Result<(), CacheError>;

    /// Remove the record. Succeeds when there is nothing to remove.
    async fn clear(&self) -> Result<(), CacheError>;
}

#[async_trait]
impl<T: LibraryCache + ?Sized> LibraryCache for Box<T> {
    async fn load(&self) -> Result<Option<CachedLibrary>, CacheError> {
        (**self).load().await
    }

    async fn save(&self, library: &CachedLibrary) -> Result<(), CacheError> {
        (**self).save(library).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        (**self).clear().await
    }
}

/// JSON file cache with write-then-rename publishing.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "library.json".to_string());
        self.path
            .with_file_name(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl LibraryCache for FileCache {
    async fn load(&self) -> Result<Option<CachedLibrary>, CacheError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let library: CachedLibrary = serde_json::from_slice(&contents)?;
        if library.version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion {
                found: library.version,
            });
        }
        tracing::debug!(
            "Loaded {} cached games from {:?}",
            library.games.len(),
            self.path
        );
        Ok(Some(library))
    }

    async fn save(&self, library: &CachedLibrary) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let payload = serde_json::to_vec_pretty(library)?;
        let temp_path = self.temp_path();
        let target = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(temp_path, &target, &payload))
            .await
            .map_err(|e| self.io_error(std::io::Error::other(e.to_string())))?
            .map_err(|e| self.io_error(e))?;

        tracing::debug!("Wrote {} games to {:?}", library.games.len(), self.path);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Temp sibling of the cache file. Removed on drop unless published.
struct TempFile {
    path: PathBuf,
    published: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            published: false,
        }
    }

    fn publish(mut self, target: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.published = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn write_atomically(temp_path: PathBuf, target: &Path, payload: &[u8]) -> std::io::Result<()> {
    let temp = TempFile::new(temp_path);
    std::fs::write(&temp.path, payload)?;
    temp.publish(target)
}

/// In-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    record: parking_lot::RwLock<Option<CachedLibrary>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache already holding `library`.
    pub fn with_record(library: CachedLibrary) -> Self {
        Self {
            record: parking_lot::RwLock::new(Some(library)),
        }
    }

    pub fn snapshot(&self) -> Option<CachedLibrary> {
        self.record.read().clone()
    }
}

#[async_trait]
impl LibraryCache for MemoryCache {
    async fn load(&self) -> Result<Option<CachedLibrary>, CacheError> {
        Ok(self.record.read().clone())
    }

    async fn save(&self, library: &CachedLibrary) -> Result<(), CacheError> {
        *self.record.write() = Some(library.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        *self.record.write() = None;
        Ok(())
    }
}
