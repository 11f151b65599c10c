//! Client configuration handling.
//!
//! Configuration is read from a TOML file (by default `config.toml` in the
//! platform config directory). Every setting has a default except the client
//! credentials, which must come from the `[credentials]` table or from the
//! `SHELFSYNC_CLIENT_ID` / `SHELFSYNC_CLIENT_SECRET` environment variables.
//!
//! ```toml
//! cache_ttl_hours = 6
//! metadata_concurrency = 4
//!
//! [credentials]
//! client_id = "..."
//! client_secret = "..."
//!
//! [endpoints]
//! library = "https://library-service.live.use1a.on.epicgames.com"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DEFAULT_PLATFORM;
use crate::store::Secret;

pub const CLIENT_ID_ENV: &str = "SHELFSYNC_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SHELFSYNC_CLIENT_SECRET";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("client credentials missing: set [credentials] or {CLIENT_ID_ENV}/{CLIENT_SECRET_ENV}")]
    MissingCredentials,

    #[error("invalid endpoint URL {url:?}: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("configuration directory not available")]
    DirUnavailable,
}

/// OAuth client identity, sent as HTTP Basic credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret),
        }
    }
}

/// Base URLs of the upstream services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Full URL of the OAuth token endpoint.
    pub token: String,
    /// Full URL the user agent is sent to for the authorization redirect flow.
    pub authorize: String,
    /// Base URL of the launcher (assets) service.
    pub launcher: String,
    /// Base URL of the library service.
    pub library: String,
    /// Base URL of the catalog service.
    pub catalog: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token: "https://account-public-service-prod03.ol.epicgames.com/account/api/oauth/token"
                .to_string(),
            authorize: "https://www.epicgames.com/id/api/redirect".to_string(),
            launcher: "https://launcher-public-service-prod06.ol.epicgames.com".to_string(),
            library: "https://library-service.live.use1a.on.epicgames.com".to_string(),
            catalog: "https://catalog-public-service-prod06.ol.epicgames.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every service at one base URL. Used against local mock servers.
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            token: format!("{base}/account/api/oauth/token"),
            authorize: format!("{base}/id/api/redirect"),
            launcher: base.to_string(),
            library: base.to_string(),
            catalog: base.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: Endpoints,

    /// Client credentials; may be overridden from the environment.
    pub credentials: Option<ClientCredentials>,

    /// Platform label for the asset list.
    pub platform: String,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,

    /// How long a cached library is served without a network call.
    pub cache_ttl_hours: i64,

    /// Tokens expiring within this window are refreshed first.
    pub expiry_skew_minutes: i64,

    /// Upper bound on library pages fetched in one sync.
    pub max_library_pages: usize,

    /// Catalog requests in flight at once (1 = sequential).
    pub metadata_concurrency: usize,

    /// Store the session in the OS keyring when available.
    pub prefer_keyring: bool,

    /// Library cache file; defaults to the platform cache directory.
    pub cache_path: Option<PathBuf>,

    /// Logging level.
    pub log_level: String,

    /// Path of the file this configuration was loaded from.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            credentials: None,
            platform: DEFAULT_PLATFORM.to_string(),
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            cache_ttl_hours: 6,
            expiry_skew_minutes: crate::token::DEFAULT_EXPIRY_SKEW_MINUTES,
            max_library_pages: 500,
            metadata_concurrency: 4,
            prefer_keyring: true,
            cache_path: None,
            log_level: "info".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours)
    }

    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.expiry_skew_minutes)
    }

    /// Resolve the client credentials, preferring the environment.
    pub fn resolve_credentials(&self) -> Result<ClientCredentials, ConfigError> {
        let env_id = std::env::var(CLIENT_ID_ENV).ok().filter(|v| !v.is_empty());
        let env_secret = std::env::var(CLIENT_SECRET_ENV).ok().filter(|v| !v.is_empty());
        merge_credentials(self.credentials.as_ref(), env_id, env_secret)
    }

    /// Library cache location: the configured path or the platform default.
    pub fn resolve_cache_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|d| d.cache_dir().join("library.json"))
            .ok_or(ConfigError::DirUnavailable)
    }
}

fn merge_credentials(
    file: Option<&ClientCredentials>,
    env_id: Option<String>,
    env_secret: Option<String>,
) -> Result<ClientCredentials, ConfigError> {
    let client_id = env_id.or_else(|| file.map(|c| c.client_id.clone()));
    let client_secret = env_secret.or_else(|| file.map(|c| c.client_secret.expose().to_string()));

    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
            Ok(ClientCredentials::new(id, secret))
        }
        _ => Err(ConfigError::MissingCredentials),
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("shelfsync.toml"))
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    if !config_path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", config_path);
        return Ok(ClientConfig {
            config_path,
            ..ClientConfig::default()
        });
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    ClientConfig::from_toml(&contents, &config_path)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "shelfsync")
}
