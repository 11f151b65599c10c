//! # Shelfsync Core
//!
//! Core library for syncing a game library from the Epic Games services.
//!
//! This crate provides:
//! - A token session that restores, refreshes and persists OAuth credentials
//! - A fetcher that aggregates the asset list, the paginated library and
//!   per-item catalog metadata into one sorted game list
//! - A cache-first sync service with stale-cache fallback
//! - In-memory and (optionally) keyring-based credential storage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shelfsync_core::{
//!     AuthClient, FetchOptions, FileCache, LibraryFetcher, LibrarySyncService, MemoryStore,
//!     ReqwestTransport, SyncResult, TokenSession, load_config,
//! };
//!
//! let config = load_config(None)?;
//! let transport = ReqwestTransport::new(config.connect_timeout(), config.read_timeout())?;
//! let auth = AuthClient::new(transport.clone(), &config.endpoints, config.resolve_credentials()?)?;
//! let session = Arc::new(TokenSession::new(MemoryStore::new(), auth));
//! session.restore().await;
//!
//! let fetcher = LibraryFetcher::new(transport, &config.endpoints, FetchOptions::from(&config))?;
//! let sync = LibrarySyncService::new(session, fetcher, FileCache::new(config.resolve_cache_path()?));
//!
//! match sync.fetch_library(false).await {
//!     SyncResult::Success(games) | SyncResult::Cached { games, .. } => println!("{} games", games.len()),
//!     SyncResult::Error(message) => eprintln!("{message}"),
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod session;
pub mod store;
pub mod sync;
pub mod token;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use auth::AuthClient;

pub use cache::{
    CacheError,
    CachedLibrary,
    FileCache,
    LibraryCache,
    MemoryCache,
};

pub use config::{
    ClientConfig,
    ClientCredentials,
    ConfigError,
    Endpoints,
    load_config,
};

pub use error::{ApiError, ShelfsyncError};

pub use fetcher::{FetchOptions, LibraryFetcher};

pub use model::{
    CatalogMetadata,
    Game,
    KeyImage,
    LibraryEntry,
    LibraryItem,
    RawAsset,
    SyncResult,
};

pub use session::TokenSession;

pub use store::{
    CredentialStore,
    MemoryStore,
    Secret,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use sync::LibrarySyncService;

pub use token::{AuthOutcome, Session, is_expired};

pub use transport::{
    HttpRequest,
    HttpResponse,
    HttpTransport,
    ReqwestTransport,
    TransportError,
};
