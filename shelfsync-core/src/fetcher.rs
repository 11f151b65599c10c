//! Library aggregation.
//!
//! [`LibraryFetcher::fetch`] turns an access token into the user's game list in
//! four steps:
//!
//! 1. **Assets** - one request for the launcher asset list of the platform.
//! 2. **Library items** - the cursor-paginated entitlement list.
//! 3. **Merge** - both lists mapped to [`LibraryEntry`] and deduplicated by
//!    `appName`. Library items come first so they win over bare assets; a
//!    surviving library item inherits the asset's build version.
//! 4. **Metadata** - one catalog request per distinct `(namespace,
//!    catalogItemId)` pair, shared by every entry with that pair. A failure
//!    here only costs those entries their enrichment.
//!
//! Add-on content is then dropped and the rest sorted by title, ignoring case.
//!
//! Non-2xx answers to the asset or library requests abort the whole fetch.
//! Individual records that fail to parse are logged and skipped.

use std::collections::{HashMap, HashSet};

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use url::Url;

use crate::auth::parse_endpoint;
use crate::config::{ClientConfig, ConfigError, Endpoints};
use crate::error::ApiError;
use crate::model::{
    CatalogItem, CatalogMetadata, DEFAULT_PLATFORM, Game, LibraryEntry, LibraryItem, RawAsset,
};
use crate::store::Secret;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Hard cap on library pages followed in one fetch.
pub const DEFAULT_MAX_LIBRARY_PAGES: usize = 500;

/// Tuning knobs for a [`LibraryFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Platform label of the asset list.
    pub platform: String,
    /// Requests allowed for the library-items stage before giving up.
    pub max_pages: usize,
    /// Catalog requests in flight at once.
    pub metadata_concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            platform: DEFAULT_PLATFORM.to_string(),
            max_pages: DEFAULT_MAX_LIBRARY_PAGES,
            metadata_concurrency: 4,
        }
    }
}

impl From<&ClientConfig> for FetchOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            max_pages: config.max_library_pages,
            metadata_concurrency: config.metadata_concurrency,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LibraryPage {
    records: Option<Vec<serde_json::Value>>,
    #[serde(rename = "responseMetadata")]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

/// Fetches and assembles the game library for an access token.
pub struct LibraryFetcher<T> {
    transport: T,
    launcher: Url,
    library: Url,
    catalog: Url,
    options: FetchOptions,
}

impl<T> std::fmt::Debug for LibraryFetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryFetcher")
            .field("launcher", &self.launcher.as_str())
            .field("library", &self.library.as_str())
            .field("catalog", &self.catalog.as_str())
            .field("options", &self.options)
            .finish()
    }
}

fn base_url(url: &str) -> Result<Url, ConfigError> {
    let parsed = parse_endpoint(url)?;
    if parsed.cannot_be_a_base() {
        return Err(ConfigError::InvalidEndpoint {
            url: url.to_string(),
            message: "not a base URL".to_string(),
        });
    }
    Ok(parsed)
}

fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::unknown(format!("invalid base URL: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl<T: HttpTransport> LibraryFetcher<T> {
    pub fn new(
        transport: T,
        endpoints: &Endpoints,
        options: FetchOptions,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            launcher: base_url(&endpoints.launcher)?,
            library: base_url(&endpoints.library)?,
            catalog: base_url(&endpoints.catalog)?,
            options,
        })
    }

    /// Run every stage and return the filtered, sorted game list.
    pub async fn fetch(&self, access_token: &Secret) -> Result<Vec<Game>, ApiError> {
        let assets = self.fetch_assets(access_token).await?;
        let items = self.fetch_library_items(access_token).await?;

        let entries = merge_entries(items, assets);
        tracing::debug!("Merged library has {} entries", entries.len());

        let games = self.enrich(access_token, &entries).await;
        let games = finalize(games);
        tracing::info!("Fetched {} games", games.len());
        Ok(games)
    }

    /// Stage 1: the launcher asset list.
    pub async fn fetch_assets(&self, access_token: &Secret) -> Result<Vec<RawAsset>, ApiError> {
        let mut url = endpoint_url(
            &self.launcher,
            &["launcher", "api", "public", "assets", self.options.platform.as_str()],
        )?;
        url.query_pairs_mut().append_pair("label", "Live");

        tracing::debug!("Fetching game assets");
        let response = self.get(url, access_token, "assets").await?;

        let elements: Vec<serde_json::Value> = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::malformed(format!("asset list is not a JSON array: {}", e)))?;

        let assets: Vec<RawAsset> = elements
            .into_iter()
            .filter_map(|element| match serde_json::from_value(element) {
                Ok(asset) => Some(asset),
                Err(e) => {
                    tracing::warn!("Skipping unparsable asset: {}", e);
                    None
                }
            })
            .collect();

        tracing::debug!("Fetched {} assets", assets.len());
        Ok(assets)
    }

    /// Stage 2: every page of library items.
    pub async fn fetch_library_items(
        &self,
        access_token: &Secret,
    ) -> Result<Vec<LibraryItem>, ApiError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut followed = HashSet::new();

        for page_number in 1..=self.options.max_pages {
            let mut url = endpoint_url(&self.library, &["library", "api", "public", "items"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("includeMetadata", "true");
                if let Some(cursor) = &cursor {
                    query.append_pair("cursor", cursor);
                }
            }

            tracing::debug!(
                page = page_number,
                cursor = cursor.as_deref().unwrap_or("initial"),
                "Fetching library page"
            );
            let response = self.get(url, access_token, "library").await?;

            let page: LibraryPage = serde_json::from_str(&response.body)
                .map_err(|e| ApiError::malformed(format!("invalid library page: {}", e)))?;

            let Some(records) = page.records else {
                tracing::debug!("Library page without records, stopping");
                return Ok(items);
            };

            for record in records {
                match serde_json::from_value::<LibraryItem>(record) {
                    Ok(item) => items.push(item),
                    Err(e) => tracing::warn!("Skipping unparsable library item: {}", e),
                }
            }

            let next = page
                .response_metadata
                .and_then(|m| m.next_cursor)
                .filter(|c| !c.is_empty());

            match next {
                None => {
                    tracing::debug!("Fetched {} library items", items.len());
                    return Ok(items);
                }
                Some(next) => {
                    if !followed.insert(next.clone()) {
                        tracing::error!("Library cursor repeated, aborting pagination");
                        return Err(ApiError::malformed("library pagination cursor repeated"));
                    }
                    cursor = Some(next);
                }
            }
        }

        tracing::error!(
            "Library pagination exceeded {} pages",
            self.options.max_pages
        );
        Err(ApiError::malformed(format!(
            "library pagination exceeded {} pages",
            self.options.max_pages
        )))
    }

    /// Stage 4, one item: catalog metadata for `(namespace, catalog_item_id)`.
    ///
    /// Returns `Ok(None)` when the catalog answers without an entry for the id.
    pub async fn fetch_metadata(
        &self,
        access_token: &Secret,
        namespace: &str,
        catalog_item_id: &str,
    ) -> Result<Option<CatalogMetadata>, ApiError> {
        let mut url = endpoint_url(
            &self.catalog,
            &["catalog", "api", "shared", "namespace", namespace, "bulk", "items"],
        )?;
        url.query_pairs_mut()
            .append_pair("id", catalog_item_id)
            .append_pair("includeDLCDetails", "false")
            .append_pair("includeMainGameDetails", "false")
            .append_pair("country", "US")
            .append_pair("locale", "en");

        let response = self.get(url, access_token, "catalog metadata").await?;

        let mut items: HashMap<String, serde_json::Value> = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::malformed(format!("invalid catalog response: {}", e)))?;

        let Some(item) = items.remove(catalog_item_id) else {
            return Ok(None);
        };
        if !item.is_object() {
            return Err(ApiError::malformed(format!(
                "catalog item {} is not an object",
                catalog_item_id
            )));
        }
        let item: CatalogItem = serde_json::from_value(item)
            .map_err(|e| ApiError::malformed(format!("invalid catalog item: {}", e)))?;
        Ok(Some(CatalogMetadata::from(item)))
    }

    /// Catalog metadata for one pair, with failures logged and absorbed.
    async fn lookup_metadata(
        &self,
        access_token: &Secret,
        namespace: &str,
        catalog_item_id: &str,
    ) -> Option<CatalogMetadata> {
        match self
            .fetch_metadata(access_token, namespace, catalog_item_id)
            .await
        {
            Ok(Some(metadata)) => Some(metadata),
            Ok(None) => {
                tracing::debug!("No catalog entry for {}", catalog_item_id);
                None
            }
            Err(e) => {
                tracing::warn!("Metadata fetch failed for {}: {}", catalog_item_id, e);
                None
            }
        }
    }

    /// Build one game per entry, looking each catalog pair up only once.
    async fn enrich(&self, access_token: &Secret, entries: &[LibraryEntry]) -> Vec<Game> {
        let concurrency = self.options.metadata_concurrency.max(1);

        let mut seen = HashSet::new();
        let keys: Vec<(&str, &str)> = entries
            .iter()
            .map(|entry| (entry.namespace.as_str(), entry.catalog_item_id.as_str()))
            .filter(|key| seen.insert(*key))
            .collect();

        let metadata: HashMap<(&str, &str), CatalogMetadata> = stream::iter(keys)
            .map(|key| async move {
                let found = self.lookup_metadata(access_token, key.0, key.1).await;
                (key, found)
            })
            .buffered(concurrency)
            .filter_map(|(key, found)| async move { found.map(|m| (key, m)) })
            .collect()
            .await;

        entries
            .iter()
            .map(|entry| {
                let shell = Game::shell(entry, &self.options.platform);
                let key = (entry.namespace.as_str(), entry.catalog_item_id.as_str());
                match metadata.get(&key) {
                    Some(found) => shell.with_metadata(found.clone()),
                    None => shell,
                }
            })
            .collect()
    }

    async fn get(
        &self,
        url: Url,
        access_token: &Secret,
        what: &str,
    ) -> Result<HttpResponse, ApiError> {
        let request = HttpRequest::get(url)
            .with_header("Authorization", format!("bearer {}", access_token.expose()));

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::HttpStatus {
                status: response.status,
                message: format!("Failed to fetch {} ({})", what, response.status),
            });
        }
        Ok(response)
    }
}

/// Merge library items and assets into one list keyed by `app_name`.
///
/// Library items are placed first, so the first occurrence of a duplicate is
/// the library item. Entries without a build version take the one from the
/// asset with the same `app_name`.
pub fn merge_entries(items: Vec<LibraryItem>, assets: Vec<RawAsset>) -> Vec<LibraryEntry> {
    let mut build_versions: HashMap<String, String> = HashMap::new();
    for asset in &assets {
        if !asset.build_version.is_empty() {
            build_versions
                .entry(asset.app_name.clone())
                .or_insert_with(|| asset.build_version.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut merged: Vec<LibraryEntry> = items
        .into_iter()
        .map(LibraryEntry::from)
        .chain(assets.into_iter().map(LibraryEntry::from))
        .filter(|entry| seen.insert(entry.app_name.clone()))
        .collect();

    for entry in &mut merged {
        if entry.build_version.is_none() {
            entry.build_version = build_versions.get(&entry.app_name).cloned();
        }
    }
    merged
}

/// Drop add-on content and sort by title, ignoring case.
pub fn finalize(games: Vec<Game>) -> Vec<Game> {
    let mut games: Vec<Game> = games.into_iter().filter(|g| !g.is_dlc).collect();
    games.sort_by_cached_key(|g| g.title.to_lowercase());
    games
}
