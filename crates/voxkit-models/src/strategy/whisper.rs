//! Whisper GGML models: a single `.bin` file

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use voxkit_core::{Clock, LocalModelRecord, ModelDescriptor, ModelType};

use super::{path_component, DownloadStrategy, ProgressFn};
use crate::engine::DownloadEngine;
use crate::error::ModelError;

/// Stores each model at `<models>/whisper/<id>`
pub struct WhisperStrategy {
    engine: Arc<DownloadEngine>,
    models_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl WhisperStrategy {
    pub fn new(engine: Arc<DownloadEngine>, models_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            models_dir,
            clock,
        }
    }

    pub fn model_path(&self, descriptor: &ModelDescriptor) -> Result<PathBuf, ModelError> {
        Ok(self
            .models_dir
            .join(ModelType::WHISPER.subdirectory())
            .join(path_component(&descriptor.id)?))
    }
}

#[async_trait]
impl DownloadStrategy for WhisperStrategy {
    fn supports(&self, descriptor: &ModelDescriptor) -> bool {
        descriptor.model_type == ModelType::WHISPER
    }

    async fn download(
        &self,
        descriptor: &ModelDescriptor,
        cancel: &CancellationToken,
        on_progress: &ProgressFn<'_>,
    ) -> Result<LocalModelRecord, ModelError> {
        let file = descriptor.primary_file().ok_or_else(|| {
            ModelError::InvalidDescriptor(format!("{} has no model file", descriptor.id))
        })?;
        let dest_path = self.model_path(descriptor)?;

        info!("Downloading Whisper model {} from {}", descriptor.id, file.url);
        self.engine
            .transfer(&file.url, &dest_path, cancel, on_progress)
            .await?;

        Ok(LocalModelRecord {
            model_id: descriptor.id.clone(),
            model_type: ModelType::WHISPER,
            primary_path: dest_path,
            secondary_path: None,
            downloaded_at_millis: self.clock.now_millis(),
        })
    }
}
