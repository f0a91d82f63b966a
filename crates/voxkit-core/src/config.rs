//! Registry configuration

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const DEFAULT_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_BASE_URL: &str = "https://huggingface.co";
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("voxkit/", env!("CARGO_PKG_VERSION"));

/// Configuration supplied when the registry is initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a fetched catalog stays fresh, in milliseconds
    pub catalog_cache_ttl_ms: u64,
    /// Base URL of the model hub (override for testing or proxying)
    pub base_url: String,
    /// Transfer buffer size in bytes
    pub download_buffer_size: usize,
    /// Root directory for models, metadata and catalog snapshots
    pub models_dir: PathBuf,
    /// User agent of the reqwest transport built by `ModelRegistry::with_defaults`
    ///
    /// Ignored by `initialize`; an injected transport sets its own.
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            catalog_cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            base_url: DEFAULT_BASE_URL.to_string(),
            download_buffer_size: DEFAULT_BUFFER_SIZE,
            models_dir: Self::default_models_dir(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl RegistryConfig {
    /// Platform data directory for models, falling back to the temp dir
    pub fn default_models_dir() -> PathBuf {
        ProjectDirs::from("com", "voxkit", "Voxkit")
            .map(|dirs| dirs.data_dir().join("models"))
            .unwrap_or_else(|| std::env::temp_dir().join("voxkit").join("models"))
    }

    /// Create config with custom models directory
    pub fn with_models_dir(mut self, models_dir: impl Into<PathBuf>) -> Self {
        self.models_dir = models_dir.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_catalog_ttl(mut self, ttl: Duration) -> Self {
        self.catalog_cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.download_buffer_size = bytes;
        self
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_millis(self.catalog_cache_ttl_ms)
    }

    /// Buffer size, never zero
    pub fn buffer_size(&self) -> usize {
        self.download_buffer_size.max(1)
    }
}
