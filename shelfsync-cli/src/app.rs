//! Wiring of the core services for one CLI invocation, and output rendering.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shelfsync_core::{
    AuthClient, ClientConfig, CredentialStore, FetchOptions, FileCache, Game, LibraryCache,
    LibraryFetcher, LibrarySyncService, ReqwestTransport, ShelfsyncError, SyncResult,
    TokenSession, create_store,
};

pub type Store = Box<dyn CredentialStore>;
pub type Session = TokenSession<Store, ReqwestTransport>;
pub type SyncService = LibrarySyncService<Store, ReqwestTransport, FileCache>;

/// Everything a command needs, built from the configuration.
pub struct App {
    pub sync: SyncService,
}

impl App {
    /// Build the services. Nothing persisted is read and no request is sent.
    pub fn build(config: &ClientConfig) -> Result<Self, ShelfsyncError> {
        let credentials = config.resolve_credentials()?;
        let transport = ReqwestTransport::new(config.connect_timeout(), config.read_timeout())?;

        let auth = AuthClient::new(transport.clone(), &config.endpoints, credentials)?;
        let session = TokenSession::with_expiry_skew(
            create_store(config.prefer_keyring),
            auth,
            config.expiry_skew(),
        );

        let fetcher =
            LibraryFetcher::new(transport, &config.endpoints, FetchOptions::from(config))?;

        let cache_path = config.resolve_cache_path()?;
        tracing::debug!("Using library cache at {:?}", cache_path);

        let sync = LibrarySyncService::new(Arc::new(session), fetcher, FileCache::new(cache_path))
            .with_cache_ttl(config.cache_ttl());

        Ok(Self { sync })
    }

    /// Build the services and restore any persisted session, refreshing it
    /// when it is about to expire.
    pub async fn restored(config: &ClientConfig) -> Result<Self, ShelfsyncError> {
        let app = Self::build(config)?;
        if app.session().restore().await {
            tracing::debug!("Restored persisted session");
        }
        Ok(app)
    }

    pub fn session(&self) -> &Session {
        self.sync.session()
    }
}

/// Remove the persisted session and the library cache named by `config`.
///
/// Needs no client credentials and sends no request.
pub async fn clear_local_state(config: &ClientConfig) -> Result<(), ShelfsyncError> {
    let cache = FileCache::new(config.resolve_cache_path()?);
    clear_state(&create_store(config.prefer_keyring), &cache).await
}

async fn clear_state<S, C>(store: &S, cache: &C) -> Result<(), ShelfsyncError>
where
    S: CredentialStore + ?Sized,
    C: LibraryCache + ?Sized,
{
    store.clear().await?;
    cache.clear().await?;
    tracing::info!("Removed stored session and library cache");
    Ok(())
}

/// JSON shape printed by `sync --format json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport<'a> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
    pub games: &'a [Game],
}

impl<'a> SyncReport<'a> {
    pub fn from_result(result: &'a SyncResult) -> Self {
        match result {
            SyncResult::Success(games) => Self {
                status: "success",
                last_sync: None,
                message: None,
                games,
            },
            SyncResult::Cached { games, last_sync } => Self {
                status: "cached",
                last_sync: Some(*last_sync),
                message: None,
                games,
            },
            SyncResult::Error(message) => Self {
                status: "error",
                last_sync: None,
                message: Some(message),
                games: &[],
            },
        }
    }
}

/// Render a sync result for the terminal.
pub fn render_text(result: &SyncResult) -> String {
    let (header, games) = match result {
        SyncResult::Success(games) => (format!("{} games (fresh)", games.len()), games),
        SyncResult::Cached { games, last_sync } => (
            format!(
                "{} games (cached {})",
                games.len(),
                last_sync.format("%Y-%m-%d %H:%M UTC")
            ),
            games,
        ),
        SyncResult::Error(message) => return format!("Sync failed: {}", message),
    };

    let mut out = header;
    for game in games {
        out.push_str("\n  ");
        out.push_str(&game.title);
        if game.title != game.app_name {
            out.push_str(&format!(" [{}]", game.app_name));
        }
        if let Some(version) = &game.build_version {
            out.push_str(&format!(" ({})", version));
        }
    }
    out
}
