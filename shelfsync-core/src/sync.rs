//! Library sync service.
//!
//! [`LibrarySyncService::fetch_library`] is the one operation a UI needs. It
//! serves a fresh cache without touching the network, otherwise fetches, and
//! falls back to any cache it has when the fetch fails. It never returns an
//! error type: every failure ends up as [`SyncResult::Cached`] or
//! [`SyncResult::Error`] with a short message.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::cache::{CacheError, CachedLibrary, LibraryCache};
use crate::error::ApiError;
use crate::fetcher::LibraryFetcher;
use crate::model::SyncResult;
use crate::session::TokenSession;
use crate::store::CredentialStore;
use crate::transport::HttpTransport;

/// Default freshness window of the library cache.
pub const DEFAULT_CACHE_TTL_HOURS: i64 = 6;

/// Cache-first library access on top of a session and a fetcher.
pub struct LibrarySyncService<S, T, C> {
    session: Arc<TokenSession<S, T>>,
    fetcher: LibraryFetcher<T>,
    cache: C,
    ttl: Duration,
}

impl<S, T, C> std::fmt::Debug for LibrarySyncService<S, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibrarySyncService")
            .field("fetcher", &self.fetcher)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<S, T, C> LibrarySyncService<S, T, C>
where
    S: CredentialStore,
    T: HttpTransport,
    C: LibraryCache,
{
    pub fn new(session: Arc<TokenSession<S, T>>, fetcher: LibraryFetcher<T>, cache: C) -> Self {
        Self {
            session,
            fetcher,
            cache,
            ttl: Duration::hours(DEFAULT_CACHE_TTL_HOURS),
        }
    }

    /// Override the freshness window.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn session(&self) -> &Arc<TokenSession<S, T>> {
        &self.session
    }

    /// Return the user's library.
    ///
    /// Without `force_refresh`, a cache younger than the freshness window is
    /// returned as is. Otherwise the library is fetched and cached; if that
    /// fails, any cache is returned regardless of age.
    pub async fn fetch_library(&self, force_refresh: bool) -> SyncResult {
        let cached = self.load_cache().await;

        if !force_refresh {
            if let Some(cached) = &cached {
                if cached.is_fresh(Utc::now(), self.ttl) {
                    tracing::info!(
                        "Serving {} games from cache (synced {})",
                        cached.games.len(),
                        cached.last_sync
                    );
                    return SyncResult::Cached {
                        games: cached.games.clone(),
                        last_sync: cached.last_sync,
                    };
                }
            }
        }

        let access_token = match self.session.ensure_access_token().await {
            Ok(token) => token,
            Err(ApiError::NotAuthenticated) => {
                tracing::info!("Library sync requested without a session");
                return SyncResult::Error(ApiError::NotAuthenticated.user_message());
            }
            Err(e) => return fallback(cached, e),
        };

        match self.fetcher.fetch(&access_token).await {
            Ok(games) => {
                let record = CachedLibrary::new(games, Utc::now());
                if let Err(e) = self.cache.save(&record).await {
                    tracing::warn!("Failed to write library cache: {}", e);
                }
                tracing::info!("Library sync complete: {} games", record.games.len());
                SyncResult::Success(record.games)
            }
            Err(e) => fallback(cached, e),
        }
    }

    /// When the cached library was written, if there is one.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.load_cache().await.map(|c| c.last_sync)
    }

    /// Remove the cached library.
    pub async fn clear_cache(&self) -> Result<(), CacheError> {
        self.cache.clear().await
    }

    async fn load_cache(&self) -> Option<CachedLibrary> {
        match self.cache.load().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Ignoring unreadable library cache: {}", e);
                None
            }
        }
    }
}

fn fallback(cached: Option<CachedLibrary>, error: ApiError) -> SyncResult {
    match cached {
        Some(cached) => {
            tracing::warn!("Library fetch failed, serving cache: {}", error);
            SyncResult::Cached {
                games: cached.games,
                last_sync: cached.last_sync,
            }
        }
        None => {
            tracing::error!("Library fetch failed with no cache: {}", error);
            SyncResult::Error(error.user_message())
        }
    }
}
