//! Piper voices: an `.onnx` model plus its `.onnx.json` config

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use voxkit_core::{Clock, LocalModelRecord, ModelDescriptor, ModelType, RemoteFile};

use super::{path_component, DownloadStrategy, ProgressFn};
use crate::engine::DownloadEngine;
use crate::error::ModelError;

/// Stores each voice in its own directory `<models>/piper/<id>/`
pub struct PiperStrategy {
    engine: Arc<DownloadEngine>,
    models_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl PiperStrategy {
    pub fn new(engine: Arc<DownloadEngine>, models_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            models_dir,
            clock,
        }
    }

    pub fn voice_dir(&self, descriptor: &ModelDescriptor) -> Result<PathBuf, ModelError> {
        Ok(self
            .models_dir
            .join(ModelType::PIPER.subdirectory())
            .join(path_component(&descriptor.id)?))
    }
}

fn required<'a>(
    file: Option<&'a RemoteFile>,
    what: &str,
    id: &str,
) -> Result<&'a RemoteFile, ModelError> {
    file.ok_or_else(|| ModelError::InvalidDescriptor(format!("{} has no {} file", id, what)))
}

#[async_trait]
impl DownloadStrategy for PiperStrategy {
    fn supports(&self, descriptor: &ModelDescriptor) -> bool {
        descriptor.model_type == ModelType::PIPER
    }

    async fn download(
        &self,
        descriptor: &ModelDescriptor,
        cancel: &CancellationToken,
        on_progress: &ProgressFn<'_>,
    ) -> Result<LocalModelRecord, ModelError> {
        let model = required(descriptor.primary_file(), "model", &descriptor.id)?;
        let config = required(descriptor.config_file(), "config", &descriptor.id)?;

        let voice_dir = self.voice_dir(descriptor)?;
        let model_path = voice_dir.join(path_component(&model.file_name)?);
        let config_path = voice_dir.join(path_component(&config.file_name)?);

        info!("Downloading Piper voice {} into {}", descriptor.id, voice_dir.display());

        // Config is small, progress only for the model
        debug!("Fetching voice config {}", config.url);
        self.engine
            .transfer(&config.url, &config_path, cancel, &|_| {})
            .await?;
        self.engine
            .transfer(&model.url, &model_path, cancel, on_progress)
            .await?;

        Ok(LocalModelRecord {
            model_id: descriptor.id.clone(),
            model_type: ModelType::PIPER,
            primary_path: model_path,
            secondary_path: Some(config_path),
            downloaded_at_millis: self.clock.now_millis(),
        })
    }
}
