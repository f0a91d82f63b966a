//! JSON registry of downloaded models

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use voxkit_core::{FileSystem, LocalModelRecord};

use crate::error::ModelError;

/// File name of the registry under the models directory
pub const METADATA_FILE_NAME: &str = "registry_metadata.json";

/// Persists [`LocalModelRecord`]s as a pretty-printed JSON array
///
/// Reads are fail-open: a missing or corrupt file is an empty registry.
/// Writes are serialized and go through a temp file plus rename.
pub struct MetadataStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(fs: Arc<dyn FileSystem>, models_dir: &Path) -> Self {
        Self {
            fs,
            path: models_dir.join(METADATA_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records
    pub async fn load(&self) -> Vec<LocalModelRecord> {
        let content = match self.fs.read_to_string(&self.path).await {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!("Ignoring corrupt model metadata at {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace all records; later duplicates of an id win
    pub async fn save(&self, records: Vec<LocalModelRecord>) -> Result<(), ModelError> {
        let _guard = self.write_lock.lock().await;
        self.write(&dedup_by_id(records)).await
    }

    /// Insert or replace the record with the same id
    pub async fn add(&self, record: LocalModelRecord) -> Result<(), ModelError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await;
        records.retain(|r| r.model_id != record.model_id);
        records.push(record);
        self.write(&records).await
    }

    /// Remove a record, returning whether it existed
    pub async fn remove(&self, model_id: &str) -> Result<bool, ModelError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await;
        let before = records.len();
        records.retain(|r| r.model_id != model_id);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }

    pub async fn get(&self, model_id: &str) -> Option<LocalModelRecord> {
        self.load().await.into_iter().find(|r| r.model_id == model_id)
    }

    async fn write(&self, records: &[LocalModelRecord]) -> Result<(), ModelError> {
        if let Some(parent) = self.path.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| ModelError::storage(format!("create {}", parent.display()), e))?;
        }

        let json = serde_json::to_string_pretty(records)?;
        let temp_path = self.path.with_extension("json.tmp");
        self.fs
            .write_string(&temp_path, &json)
            .await
            .map_err(|e| ModelError::storage(format!("write {}", temp_path.display()), e))?;
        self.fs
            .rename(&temp_path, &self.path)
            .await
            .map_err(|e| ModelError::storage(format!("replace {}", self.path.display()), e))?;

        debug!("Saved {} model records", records.len());
        Ok(())
    }
}

fn dedup_by_id(records: Vec<LocalModelRecord>) -> Vec<LocalModelRecord> {
    let mut unique: Vec<LocalModelRecord> = Vec::with_capacity(records.len());
    for record in records {
        unique.retain(|r| r.model_id != record.model_id);
        unique.push(record);
    }
    unique
}
