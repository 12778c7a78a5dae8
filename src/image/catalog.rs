//! Image catalog resolution.
//!
//! A catalog maps a user-level query (release or alias, optionally
//! qualified by a remote as `<remote>:<release>`) to the downloadable
//! artifacts for one concrete image version. The catalog id it returns is
//! the content identity the vault caches under; when the catalog starts
//! answering the same query with a new id, the old prepared entry is stale.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::VaultConfig;

/// The remote queries resolve against when they name none.
pub const DEFAULT_REMOTE: &str = "release";

/// A user-level request for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Instance name; empty when only resolving. Not persisted; the
    /// journal key carries it.
    #[serde(skip)]
    pub name: String,
    /// Catalog-visible release, channel, or alias.
    pub release: String,
    /// Whether the instance record survives vault restarts.
    pub persistent: bool,
}

/// What the catalog knows about one image version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogInfo {
    /// Opaque content identity of the prepared image.
    pub id: String,
    pub release: String,
    pub version: String,
    pub image_location: String,
    /// May be empty when the image boots without a separate kernel.
    pub kernel_location: String,
    pub initrd_location: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("image catalog unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("no image found for release {release:?}")]
    QueryNotFound { release: String },

    #[error("unsupported image remote {remote:?}")]
    UnsupportedRemote { remote: String },
}

/// Resolves queries to catalog metadata.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn info_for(&self, query: &Query) -> Result<CatalogInfo, CatalogError>;
}

/// One entry of a remote's image index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub release: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub id: String,
    pub version: String,
    pub image_location: String,
    #[serde(default)]
    pub kernel_location: String,
    #[serde(default)]
    pub initrd_location: String,
}

/// The JSON document a remote serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub images: Vec<CatalogEntry>,
}

/// Catalog client backed by per-remote HTTP image indices.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    remotes: HashMap<String, String>,
}

impl HttpCatalogClient {
    /// Client with the configured URL as the default remote's index.
    pub fn new(config: &VaultConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| CatalogError::Unavailable {
                reason: error.to_string(),
            })?;
        let mut remotes = HashMap::new();
        remotes.insert(DEFAULT_REMOTE.to_string(), config.catalog_url.clone());
        Ok(Self { client, remotes })
    }

    /// Register an additional remote by name.
    pub fn with_remote(mut self, name: impl Into<String>, index_url: impl Into<String>) -> Self {
        self.remotes.insert(name.into(), index_url.into());
        self
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn info_for(&self, query: &Query) -> Result<CatalogInfo, CatalogError> {
        let (remote, release) = split_remote(&query.release);
        let remote = remote.unwrap_or(DEFAULT_REMOTE);
        let index_url = self
            .remotes
            .get(remote)
            .ok_or_else(|| CatalogError::UnsupportedRemote {
                remote: remote.to_string(),
            })?;

        debug!(remote, release, url = %index_url, "resolving query against image index");
        let response = self.client.get(index_url.as_str()).send().await.map_err(|error| {
            CatalogError::Unavailable {
                reason: error.to_string(),
            }
        })?;
        if !response.status().is_success() {
            return Err(CatalogError::Unavailable {
                reason: format!("index fetch returned {}", response.status()),
            });
        }
        let index: CatalogIndex =
            response
                .json()
                .await
                .map_err(|error| CatalogError::Unavailable {
                    reason: error.to_string(),
                })?;

        let entry = resolve(&index, release).ok_or_else(|| CatalogError::QueryNotFound {
            release: query.release.clone(),
        })?;
        Ok(CatalogInfo {
            id: entry.id.clone(),
            release: entry.release.clone(),
            version: entry.version.clone(),
            image_location: entry.image_location.clone(),
            kernel_location: entry.kernel_location.clone(),
            initrd_location: entry.initrd_location.clone(),
        })
    }
}

/// Split `<remote>:<release>` into its parts; no colon means no remote.
fn split_remote(release: &str) -> (Option<&str>, &str) {
    match release.split_once(':') {
        Some((remote, rest)) if !remote.is_empty() => (Some(remote), rest),
        _ => (None, release),
    }
}

/// Find the index entry matching a release name or one of its aliases.
fn resolve<'a>(index: &'a CatalogIndex, release: &str) -> Option<&'a CatalogEntry> {
    index
        .images
        .iter()
        .find(|entry| entry.release == release || entry.aliases.iter().any(|a| a == release))
}
