//! Remote model catalogs with in-memory and on-disk caching
//!
//! A [`CatalogProvider`] owns the cache for one model family. What the
//! family's manifest looks like and where it lives is described by a
//! [`ManifestSource`].

mod piper;
mod whisper;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxkit_core::{
    Clock, FileSystem, HttpRequest, HttpTransport, ModelAttributes, ModelDescriptor, ModelType,
    PiperQuality, RegistryConfig,
};

use crate::error::ModelError;

pub use piper::PiperManifest;
pub use whisper::WhisperManifest;

/// Family-specific half of a catalog
pub trait ManifestSource: Send + Sync {
    /// Family tag of every descriptor this source produces
    fn family(&self) -> ModelType;

    /// URL of the manifest under `base_url`
    fn manifest_url(&self, base_url: &str) -> String;

    /// File name of the disk snapshot under the models directory
    fn snapshot_file_name(&self) -> &str;

    /// Parse a manifest body, skipping malformed entries
    ///
    /// Fails only when the document as a whole is unusable.
    fn parse_manifest(
        &self,
        body: &str,
        base_url: &str,
    ) -> Result<Vec<ModelDescriptor>, ModelError>;
}

/// Criteria applied to a cached catalog
///
/// Criteria that do not apply to a family are ignored for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogFilter {
    /// Case-insensitive language prefix (e.g. "en", "de_DE")
    pub language: Option<String>,
    /// Piper voice quality
    pub quality: Option<PiperQuality>,
    /// Whisper English-only models (true) or multilingual ones (false)
    pub english_only: Option<bool>,
    /// Upper bound on the estimated size
    pub max_size_bytes: Option<u64>,
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn quality(mut self, quality: PiperQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn english_only(mut self, english_only: bool) -> Self {
        self.english_only = Some(english_only);
        self
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, descriptor: &ModelDescriptor) -> bool {
        if let Some(max) = self.max_size_bytes {
            if descriptor.size_bytes > max {
                return false;
            }
        }

        match &descriptor.attributes {
            ModelAttributes::Whisper(attrs) => {
                if self.english_only.is_some_and(|flag| flag != attrs.english_only) {
                    return false;
                }
                // Multilingual models cover every language
                match &self.language {
                    Some(language) if attrs.english_only => language_family(language) == "en",
                    _ => true,
                }
            }
            ModelAttributes::Piper(attrs) => {
                if self.quality.is_some_and(|quality| quality != attrs.quality) {
                    return false;
                }
                match &self.language {
                    Some(language) => attrs
                        .language
                        .code
                        .to_ascii_lowercase()
                        .starts_with(&language.to_ascii_lowercase()),
                    None => true,
                }
            }
            ModelAttributes::Other(_) => true,
        }
    }
}

/// "en_US" -> "en", "pt-BR" -> "pt"
fn language_family(language: &str) -> String {
    language
        .split(['_', '-'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// On-disk mirror of the last successful fetch
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogSnapshot {
    entries: Vec<ModelDescriptor>,
    cached_at_millis: u64,
    /// Base URL the entries' download URLs were built from
    #[serde(default)]
    base_url: String,
}

impl CatalogSnapshot {
    /// Entries with download URLs moved onto `base_url`
    fn into_entries(self, base_url: &str) -> Vec<ModelDescriptor> {
        let mut entries = self.entries;
        if self.base_url.is_empty() || self.base_url == base_url {
            return entries;
        }
        for file in entries.iter_mut().flat_map(|d| d.files.iter_mut()) {
            if let Some(path) = file.url.strip_prefix(&self.base_url) {
                file.url = format!("{}{}", base_url, path);
            }
        }
        entries
    }
}

struct CachedCatalog {
    entries: Arc<Vec<ModelDescriptor>>,
    fetched_at_millis: u64,
}

/// Fetches, caches and filters the catalog of one model family
pub struct CatalogProvider {
    source: Box<dyn ManifestSource>,
    transport: Arc<dyn HttpTransport>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    base_url: String,
    ttl_ms: u64,
    snapshot_path: PathBuf,
    cache: Mutex<Option<CachedCatalog>>,
}

impl CatalogProvider {
    pub fn new(
        source: Box<dyn ManifestSource>,
        transport: Arc<dyn HttpTransport>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        config: &RegistryConfig,
    ) -> Self {
        let snapshot_path = config.models_dir.join(source.snapshot_file_name());
        Self {
            source,
            transport,
            fs,
            clock,
            base_url: config.base_url.clone(),
            ttl_ms: config.catalog_cache_ttl_ms,
            snapshot_path,
            cache: Mutex::new(None),
        }
    }

    pub fn family(&self) -> ModelType {
        self.source.family()
    }

    /// Descriptors matching `filter`
    ///
    /// Within the TTL an empty filter returns the cached `Arc` itself.
    pub async fn fetch_descriptors(
        &self,
        filter: &CatalogFilter,
    ) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        let mut cache = self.cache.lock().await;

        let now = self.clock.now_millis();
        let fresh = cache
            .as_ref()
            .filter(|cached| now.saturating_sub(cached.fetched_at_millis) < self.ttl_ms)
            .map(|cached| cached.entries.clone());
        let all = match fresh {
            Some(entries) => {
                debug!("Serving {} catalog from memory", self.family());
                entries
            }
            None => self.fetch_into(&mut cache).await?,
        };
        drop(cache);

        if filter.is_empty() {
            return Ok(all);
        }
        Ok(Arc::new(
            all.iter().filter(|d| filter.matches(d)).cloned().collect(),
        ))
    }

    /// Drop the in-memory entry and fetch from the network
    pub async fn refresh(&self) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        let mut cache = self.cache.lock().await;
        *cache = None;
        self.fetch_into(&mut cache).await
    }

    /// Drop the in-memory entry and the disk snapshot
    pub async fn clear_cache(&self) -> Result<(), ModelError> {
        let mut cache = self.cache.lock().await;
        *cache = None;
        self.fs
            .remove_file(&self.snapshot_path)
            .await
            .map_err(|e| {
                ModelError::storage(format!("remove {}", self.snapshot_path.display()), e)
            })?;
        debug!("Cleared {} catalog cache", self.family());
        Ok(())
    }

    async fn fetch_into(
        &self,
        cache: &mut Option<CachedCatalog>,
    ) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        let (entries, fetched_at_millis) = match self.fetch_remote().await {
            Ok(entries) => {
                let now = self.clock.now_millis();
                self.write_snapshot(&entries, now).await;
                (entries, now)
            }
            Err(e) => match self.read_snapshot().await {
                Some(snapshot) => {
                    warn!(
                        "Fetching {} catalog failed ({}), using snapshot with {} entries",
                        self.family(),
                        e,
                        snapshot.entries.len()
                    );
                    let cached_at_millis = snapshot.cached_at_millis;
                    (snapshot.into_entries(&self.base_url), cached_at_millis)
                }
                None => return Err(e),
            },
        };

        let entries = Arc::new(entries);
        *cache = Some(CachedCatalog {
            entries: entries.clone(),
            fetched_at_millis,
        });
        Ok(entries)
    }

    async fn fetch_remote(&self) -> Result<Vec<ModelDescriptor>, ModelError> {
        let url = self.source.manifest_url(&self.base_url);
        info!("Fetching {} catalog from {}", self.family(), url);

        let response = self.transport.get(HttpRequest::get(&url)).await?;
        if !response.is_success() {
            return Err(ModelError::HttpStatus {
                status: response.status,
                url,
            });
        }
        let body = response.text().await?;

        let entries = self.source.parse_manifest(&body, &self.base_url)?;
        info!("Found {} {} models", entries.len(), self.family());
        Ok(entries)
    }

    async fn read_snapshot(&self) -> Option<CatalogSnapshot> {
        let content = match self.fs.read_to_string(&self.snapshot_path).await {
            Ok(content) => content?,
            Err(e) => {
                warn!("Failed to read {}: {}", self.snapshot_path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "Ignoring corrupt catalog snapshot {}: {}",
                    self.snapshot_path.display(),
                    e
                );
                None
            }
        }
    }

    /// Best effort: a failed write only costs the offline fallback
    async fn write_snapshot(&self, entries: &[ModelDescriptor], now: u64) {
        let snapshot = CatalogSnapshot {
            entries: entries.to_vec(),
            cached_at_millis: now,
            base_url: self.base_url.clone(),
        };
        let result = async {
            if let Some(parent) = self.snapshot_path.parent() {
                self.fs.create_dir_all(parent).await?;
            }
            let json = serde_json::to_string(&snapshot)?;
            self.fs.write_string(&self.snapshot_path, &json).await?;
            Ok::<_, ModelError>(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to write {}: {}", self.snapshot_path.display(), e);
        }
    }
}
