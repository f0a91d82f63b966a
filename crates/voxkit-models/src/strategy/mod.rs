//! Per-family download strategies
//!
//! A strategy knows which files a family needs, where they live on disk and
//! in what order to fetch them. Strategies return a [`LocalModelRecord`] but
//! never persist it; the registry does.

mod piper;
mod whisper;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use voxkit_core::{DownloadProgress, LocalModelRecord, ModelDescriptor};

use crate::error::ModelError;

pub use piper::PiperStrategy;
pub use whisper::WhisperStrategy;

/// Progress callback passed down to strategies and the engine
pub type ProgressFn<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// Downloads one family of models
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Returns true when this strategy can handle `descriptor`
    fn supports(&self, descriptor: &ModelDescriptor) -> bool;

    /// Download every file of `descriptor` and describe the result
    async fn download(
        &self,
        descriptor: &ModelDescriptor,
        cancel: &CancellationToken,
        on_progress: &ProgressFn<'_>,
    ) -> Result<LocalModelRecord, ModelError>;
}

/// Ordered list of strategies; the first one that supports a descriptor wins
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: Vec<Arc<dyn DownloadStrategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn DownloadStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn resolve(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn DownloadStrategy>, ModelError> {
        self.strategies
            .iter()
            .find(|s| s.supports(descriptor))
            .cloned()
            .ok_or_else(|| ModelError::NoStrategy(descriptor.model_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Reject names that would escape the models directory
pub(crate) fn path_component(name: &str) -> Result<&str, ModelError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(ModelError::InvalidDescriptor(format!(
            "'{}' is not a valid file name",
            name
        )));
    }
    Ok(name)
}
