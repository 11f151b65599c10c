//! Domain model types for shelfsync.
//!
//! This module defines the types that flow through a library sync:
//! - [`RawAsset`] - An entry of the launcher asset list
//! - [`LibraryItem`] - An entitlement record of the paginated library
//! - [`LibraryEntry`] - The merged identity both of the above map into
//! - [`CatalogMetadata`] - Store-listing details for one catalog item
//! - [`Game`] - The persisted/display entity
//! - [`SyncResult`] - The outcome of one sync invocation
//!
//! Wire and cache formats use camelCase field names.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Platform label assigned to games when nothing else is known.
pub const DEFAULT_PLATFORM: &str = "Windows";

/// Category path that marks a catalog item as add-on content.
const ADDON_CATEGORY: &str = "addons";

/// An entry of the launcher asset list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAsset {
    pub app_name: String,
    pub label_name: String,
    pub build_version: String,
    pub namespace: String,
    pub catalog_item_id: String,
}

/// An entitlement record from the library service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub app_name: String,
    pub namespace: String,
    pub catalog_item_id: String,
    #[serde(default)]
    pub sandbox_type: Option<String>,
}

/// Identity shape that assets and library items are merged into.
///
/// Keyed by `app_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub app_name: String,
    pub namespace: String,
    pub catalog_item_id: String,
    pub sandbox_type: Option<String>,
    pub build_version: Option<String>,
}

impl From<LibraryItem> for LibraryEntry {
    fn from(item: LibraryItem) -> Self {
        Self {
            app_name: item.app_name,
            namespace: item.namespace,
            catalog_item_id: item.catalog_item_id,
            sandbox_type: item.sandbox_type,
            build_version: None,
        }
    }
}

impl From<RawAsset> for LibraryEntry {
    fn from(asset: RawAsset) -> Self {
        Self {
            app_name: asset.app_name,
            namespace: asset.namespace,
            catalog_item_id: asset.catalog_item_id,
            sandbox_type: None,
            build_version: Some(asset.build_version).filter(|v| !v.is_empty()),
        }
    }
}

/// Image reference attached to a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImage {
    #[serde(rename = "type")]
    pub image_type: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct CatalogCategory {
    #[serde(default, deserialize_with = "lenient_string")]
    path: Option<String>,
}

/// Catalog item as returned inside the bulk-items map.
///
/// Every field is optional and decoded on its own: a field of the wrong type
/// reads as absent, and list elements that do not parse are dropped. A bad
/// key image therefore never hides the add-on category of the same item.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    #[serde(default, deserialize_with = "lenient_string")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    developer: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    key_images: Option<Vec<KeyImage>>,
    #[serde(default, deserialize_with = "lenient_list")]
    categories: Option<Vec<CatalogCategory>>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(Some(value)),
        serde_json::Value::Null => Ok(None),
        other => {
            tracing::warn!("Ignoring catalog field of unexpected type: {}", other);
            Ok(None)
        }
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let serde_json::Value::Array(elements) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let parsed = elements
        .into_iter()
        .filter_map(|element| match serde_json::from_value(element) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Skipping unparsable catalog list entry: {}", e);
                None
            }
        })
        .collect();
    Ok(Some(parsed))
}

/// Store-listing details for one `(namespace, catalogItemId)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub key_images: Option<Vec<KeyImage>>,
    pub is_dlc: bool,
}

impl From<CatalogItem> for CatalogMetadata {
    fn from(item: CatalogItem) -> Self {
        let is_dlc = item
            .categories
            .unwrap_or_default()
            .iter()
            .any(|c| c.path.as_deref() == Some(ADDON_CATEGORY));
        Self {
            title: item.title.filter(|t| !t.trim().is_empty()),
            description: item.description,
            developer: item.developer,
            key_images: item.key_images.filter(|images| !images.is_empty()),
            is_dlc,
        }
    }
}

/// A game in the user's library, as cached and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub app_name: String,
    pub title: String,
    pub namespace: String,
    pub catalog_item_id: String,
    #[serde(default)]
    pub build_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub key_images: Option<Vec<KeyImage>>,
    #[serde(rename = "isDLC", default)]
    pub is_dlc: bool,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

impl Game {
    /// Build the pre-metadata shell for a merged entry.
    ///
    /// The title is the app name until catalog metadata says otherwise.
    pub fn shell(entry: &LibraryEntry, platform: &str) -> Self {
        Self {
            app_name: entry.app_name.clone(),
            title: entry.app_name.clone(),
            namespace: entry.namespace.clone(),
            catalog_item_id: entry.catalog_item_id.clone(),
            build_version: entry.build_version.clone(),
            description: None,
            developer: None,
            key_images: None,
            is_dlc: false,
            platform: platform.to_string(),
        }
    }

    /// Apply catalog metadata, producing the enriched game.
    pub fn with_metadata(mut self, metadata: CatalogMetadata) -> Self {
        if let Some(title) = metadata.title {
            self.title = title;
        }
        self.description = metadata.description;
        self.developer = metadata.developer;
        self.key_images = metadata.key_images;
        self.is_dlc = metadata.is_dlc;
        self
    }
}

/// Outcome of one library sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Freshly fetched from the service.
    Success(Vec<Game>),

    /// Served from the cache; `last_sync` is when it was written.
    Cached {
        games: Vec<Game>,
        last_sync: DateTime<Utc>,
    },

    /// Nothing to show; the message is suitable for display.
    Error(String),
}

impl SyncResult {
    /// The games carried by this result, if any.
    pub fn games(&self) -> Option<&[Game]> {
        match self {
            Self::Success(games) | Self::Cached { games, .. } => Some(games),
            Self::Error(_) => None,
        }
    }
}
