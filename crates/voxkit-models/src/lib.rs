//! Model discovery, download and local registry for voxkit
//!
//! This crate fetches model catalogs from HuggingFace, downloads model files
//! with resume and cancellation support, and keeps a JSON registry of the
//! models available on disk.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{CatalogFilter, CatalogProvider, ManifestSource, PiperManifest, WhisperManifest};
pub use engine::{partial_path, DownloadEngine};
pub use error::{ErrorKind, ModelError};
pub use metadata::MetadataStore;
pub use registry::ModelRegistry;
pub use strategy::{DownloadStrategy, PiperStrategy, ProgressFn, StrategySet, WhisperStrategy};

pub use tokio_util::sync::CancellationToken;
pub use voxkit_core::types::*;
pub use voxkit_core::{
    Clock, FileSystem, HttpRequest, HttpResponse, HttpTransport, LocalFileSystem, ManualClock,
    RegistryConfig, ReqwestTransport, SystemClock, TransportError,
};
