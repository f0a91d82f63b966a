//! Registry facade: discover, download and manage local models

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxkit_core::{
    Clock, DownloadProgress, DownloadState, FileSystem, HttpTransport, LocalFileSystem,
    LocalModelRecord, ModelDescriptor, ModelType, PiperQuality, RegistryConfig, ReqwestTransport,
    SystemClock,
};

use crate::catalog::{
    CatalogFilter, CatalogProvider, ManifestSource, PiperManifest, WhisperManifest,
};
use crate::engine::{partial_path, DownloadEngine};
use crate::error::{ErrorKind, ModelError};
use crate::metadata::MetadataStore;
use crate::strategy::{DownloadStrategy, PiperStrategy, StrategySet, WhisperStrategy};

/// Components built by [`ModelRegistry::initialize`]
///
/// Replaced as a whole on registration so readers never see a half update.
#[derive(Clone)]
struct Initialized {
    config: RegistryConfig,
    store: Arc<MetadataStore>,
    engine: Arc<DownloadEngine>,
    strategies: StrategySet,
    catalogs: Vec<Arc<CatalogProvider>>,
}

/// What joiners of an in-flight download observe
#[derive(Debug, Clone)]
enum FlightStatus {
    Running(DownloadProgress),
    Completed,
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}

struct InFlight {
    cancel: CancellationToken,
    status: Arc<watch::Sender<FlightStatus>>,
}

type FlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

enum Claim {
    Join(watch::Receiver<FlightStatus>),
    Lead(CancellationToken, Arc<watch::Sender<FlightStatus>>),
}

/// Releases the in-flight slot even when the leading future is dropped
struct SlotGuard {
    in_flight: FlightMap,
    model_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.model_id);
    }
}

/// Entry point for model management
///
/// Create one per models directory with [`ModelRegistry::new`] (or
/// [`ModelRegistry::with_defaults`]) and call [`ModelRegistry::initialize`]
/// before anything else.
pub struct ModelRegistry {
    fs: Arc<dyn FileSystem>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    state: RwLock<Option<Arc<Initialized>>>,
    in_flight: FlightMap,
}

impl ModelRegistry {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fs,
            transport,
            clock,
            state: RwLock::new(None),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registry backed by the local disk, reqwest and the system clock
    ///
    /// The transport sends `config.user_agent`; pass the same config to
    /// [`ModelRegistry::initialize`].
    pub fn with_defaults(config: &RegistryConfig) -> Result<Self, ModelError> {
        Ok(Self::new(
            Arc::new(LocalFileSystem),
            Arc::new(ReqwestTransport::new(&config.user_agent)?),
            Arc::new(SystemClock),
        ))
    }

    /// Set up the store, engine, built-in strategies and catalogs
    ///
    /// Calling it again rebuilds everything from the new config.
    pub async fn initialize(&self, config: RegistryConfig) -> Result<(), ModelError> {
        self.fs
            .create_dir_all(&config.models_dir)
            .await
            .map_err(|e| {
                ModelError::storage(format!("create {}", config.models_dir.display()), e)
            })?;

        let engine = Arc::new(DownloadEngine::new(
            self.transport.clone(),
            self.fs.clone(),
            config.buffer_size(),
        ));

        let mut strategies = StrategySet::new();
        strategies.register(Arc::new(WhisperStrategy::new(
            engine.clone(),
            config.models_dir.clone(),
            self.clock.clone(),
        )));
        strategies.register(Arc::new(PiperStrategy::new(
            engine.clone(),
            config.models_dir.clone(),
            self.clock.clone(),
        )));

        let catalogs = vec![
            Arc::new(self.catalog(Box::new(WhisperManifest), &config)),
            Arc::new(self.catalog(Box::new(PiperManifest), &config)),
        ];

        let initialized = Initialized {
            store: Arc::new(MetadataStore::new(self.fs.clone(), &config.models_dir)),
            engine,
            strategies,
            catalogs,
            config,
        };

        info!(
            "Model registry initialized at {}",
            initialized.config.models_dir.display()
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(initialized));
        Ok(())
    }

    fn catalog(&self, source: Box<dyn ManifestSource>, config: &RegistryConfig) -> CatalogProvider {
        CatalogProvider::new(
            source,
            self.transport.clone(),
            self.fs.clone(),
            self.clock.clone(),
            config,
        )
    }

    fn initialized(&self) -> Result<Arc<Initialized>, ModelError> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ModelError::NotInitialized)
    }

    fn update(&self, apply: impl FnOnce(&mut Initialized)) -> Result<(), ModelError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = state.as_ref().ok_or(ModelError::NotInitialized)?;
        let mut next = Initialized::clone(current);
        apply(&mut next);
        *state = Some(Arc::new(next));
        Ok(())
    }

    /// Add a strategy for another model family
    ///
    /// Strategies are tried in registration order after the built-in ones.
    pub fn register_strategy(&self, strategy: Arc<dyn DownloadStrategy>) -> Result<(), ModelError> {
        self.update(|state| state.strategies.register(strategy))
    }

    /// Add a catalog, replacing any existing catalog of the same family
    pub fn register_catalog(&self, source: Box<dyn ManifestSource>) -> Result<(), ModelError> {
        let config = self.config()?;
        let provider = Arc::new(self.catalog(source, &config));
        self.update(|state| {
            let family = provider.family();
            state.catalogs.retain(|c| c.family() != family);
            state.catalogs.push(provider);
        })
    }

    pub fn config(&self) -> Result<RegistryConfig, ModelError> {
        Ok(self.initialized()?.config.clone())
    }

    /// Engine shared by the built-in strategies, for hosts writing their own
    pub fn engine(&self) -> Result<Arc<DownloadEngine>, ModelError> {
        Ok(self.initialized()?.engine.clone())
    }

    // Discovery

    /// List the catalog of `family`, cached per the configured TTL
    pub async fn discover(
        &self,
        family: &ModelType,
        filter: &CatalogFilter,
    ) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        let state = self.initialized()?;
        let provider = state
            .catalogs
            .iter()
            .find(|c| &c.family() == family)
            .ok_or_else(|| ModelError::UnknownFamily(family.to_string()))?;
        provider.fetch_descriptors(filter).await
    }

    /// All Whisper models, smallest first
    pub async fn whisper_models(&self) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        self.discover(&ModelType::WHISPER, &CatalogFilter::new()).await
    }

    /// Piper voices, optionally narrowed by language prefix and quality
    pub async fn piper_voices(
        &self,
        language: Option<&str>,
        quality: Option<PiperQuality>,
    ) -> Result<Arc<Vec<ModelDescriptor>>, ModelError> {
        let filter = CatalogFilter {
            language: language.map(str::to_string),
            quality,
            ..CatalogFilter::default()
        };
        self.discover(&ModelType::PIPER, &filter).await
    }

    // Download

    /// Download `descriptor` unless a local copy exists
    ///
    /// `on_progress` first receives `Pending` and finally exactly one of
    /// `Completed`, `Failed` or `Cancelled`. A call for a model that is
    /// already downloading joins the running transfer.
    pub async fn download<F>(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: F,
    ) -> Result<LocalModelRecord, ModelError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let state = self.initialized()?;
        on_progress(DownloadProgress::pending());

        if let Some((record, size)) = self.local_copy(&state, &descriptor.id).await {
            info!("Model {} already downloaded", descriptor.id);
            on_progress(DownloadProgress::completed(size));
            return Ok(record);
        }

        let strategy = match state.strategies.resolve(descriptor) {
            Ok(strategy) => strategy,
            Err(e) => {
                on_progress(DownloadProgress::failed());
                return Err(e);
            }
        };

        let claim = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&descriptor.id) {
                Some(flight) => Claim::Join(flight.status.subscribe()),
                None => {
                    let cancel = CancellationToken::new();
                    let (sender, _) =
                        watch::channel(FlightStatus::Running(DownloadProgress::pending()));
                    let status = Arc::new(sender);
                    in_flight.insert(
                        descriptor.id.clone(),
                        InFlight {
                            cancel: cancel.clone(),
                            status: status.clone(),
                        },
                    );
                    Claim::Lead(cancel, status)
                }
            }
        };
        let (cancel, status) = match claim {
            Claim::Join(receiver) => {
                debug!("Joining in-flight download of {}", descriptor.id);
                return self.join(&state, &descriptor.id, receiver, &on_progress).await;
            }
            Claim::Lead(cancel, status) => (cancel, status),
        };
        let _slot = SlotGuard {
            in_flight: self.in_flight.clone(),
            model_id: descriptor.id.clone(),
        };

        // The previous leader may have finished between the check and the claim
        if let Some((record, size)) = self.local_copy(&state, &descriptor.id).await {
            status.send_replace(FlightStatus::Completed);
            on_progress(DownloadProgress::completed(size));
            return Ok(record);
        }

        self.lead(&state, strategy, descriptor, &cancel, &status, &on_progress)
            .await
    }

    async fn lead(
        &self,
        state: &Initialized,
        strategy: Arc<dyn DownloadStrategy>,
        descriptor: &ModelDescriptor,
        cancel: &CancellationToken,
        status: &watch::Sender<FlightStatus>,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<LocalModelRecord, ModelError> {
        info!("Downloading {} ({})", descriptor.display_name, descriptor.id);

        // Completion is reported here once the record is saved
        let terminal_sent = AtomicBool::new(false);
        let relay = |progress: DownloadProgress| {
            if terminal_sent.load(Ordering::SeqCst) || progress.state == DownloadState::Completed {
                return;
            }
            if progress.state.is_terminal() {
                terminal_sent.store(true, Ordering::SeqCst);
            }
            on_progress(progress);
            if progress.state == DownloadState::Downloading {
                status.send_replace(FlightStatus::Running(progress));
            }
        };

        let result = match strategy.download(descriptor, cancel, &relay).await {
            Ok(record) => state.store.add(record.clone()).await.map(|_| record),
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                let size = self.primary_size(&record).await.unwrap_or(descriptor.size_bytes);
                status.send_replace(FlightStatus::Completed);
                info!("Model {} ready at {}", record.model_id, record.primary_path.display());
                on_progress(DownloadProgress::completed(size));
                Ok(record)
            }
            Err(e) => {
                let (terminal, flight) = if e.is_cancelled() {
                    (DownloadProgress::cancelled(), FlightStatus::Cancelled)
                } else {
                    warn!("Download of {} failed: {}", descriptor.id, e);
                    (
                        DownloadProgress::failed(),
                        FlightStatus::Failed {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    )
                };
                status.send_replace(flight);
                if !terminal_sent.load(Ordering::SeqCst) {
                    on_progress(terminal);
                }
                Err(e)
            }
        }
    }

    async fn join(
        &self,
        state: &Initialized,
        model_id: &str,
        mut receiver: watch::Receiver<FlightStatus>,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<LocalModelRecord, ModelError> {
        let mut leader_gone = false;
        loop {
            let status = receiver.borrow_and_update().clone();
            match status {
                FlightStatus::Running(progress) => {
                    if leader_gone {
                        on_progress(DownloadProgress::cancelled());
                        return Err(ModelError::Cancelled);
                    }
                    if progress.state == DownloadState::Downloading {
                        on_progress(progress);
                    }
                }
                FlightStatus::Completed => {
                    return match self.local_copy(state, model_id).await {
                        Some((record, size)) => {
                            on_progress(DownloadProgress::completed(size));
                            Ok(record)
                        }
                        None => {
                            on_progress(DownloadProgress::failed());
                            Err(ModelError::ModelNotFound(model_id.to_string()))
                        }
                    };
                }
                FlightStatus::Cancelled => {
                    on_progress(DownloadProgress::cancelled());
                    return Err(ModelError::Cancelled);
                }
                FlightStatus::Failed { kind, message } => {
                    on_progress(DownloadProgress::failed());
                    return Err(ModelError::DownloadFailed { kind, message });
                }
            }

            if receiver.changed().await.is_err() {
                leader_gone = true;
            }
        }
    }

    /// Cancel the download of `model_id`, keeping its partial file
    ///
    /// Returns false when nothing was downloading under that id.
    pub fn cancel(&self, model_id: &str) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.get(model_id) {
            Some(flight) => {
                info!("Cancelling download of {}", model_id);
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of calls waiting on the download of `model_id`
    #[cfg(test)]
    fn joiners(&self, model_id: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .map_or(0, |flight| flight.status.receiver_count())
    }

    pub fn is_downloading(&self, model_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(model_id)
    }

    // Local management

    /// Record of `model_id` if its primary file is still on disk
    pub async fn get_local(&self, model_id: &str) -> Result<Option<LocalModelRecord>, ModelError> {
        let state = self.initialized()?;
        Ok(self.local_copy(&state, model_id).await.map(|(record, _)| record))
    }

    /// Every recorded model whose primary file is still on disk
    pub async fn list_local(&self) -> Result<Vec<LocalModelRecord>, ModelError> {
        let state = self.initialized()?;
        let mut present = Vec::new();
        for record in state.store.load().await {
            if self.fs.exists(&record.primary_path).await {
                present.push(record);
            }
        }
        Ok(present)
    }

    /// Total bytes used by downloaded models
    pub async fn storage_usage(&self) -> Result<u64, ModelError> {
        let mut total = 0;
        for record in self.list_local().await? {
            total += self.primary_size(&record).await.unwrap_or(0);
            if let Some(secondary) = &record.secondary_path {
                total += self.fs.file_size(secondary).await.ok().flatten().unwrap_or(0);
            }
        }
        Ok(total)
    }

    /// Delete a model's files and its record
    ///
    /// Returns false, touching nothing, when no record exists.
    pub async fn delete(&self, model_id: &str) -> Result<bool, ModelError> {
        let state = self.initialized()?;
        let Some(record) = state.store.get(model_id).await else {
            return Ok(false);
        };

        let mut files = vec![record.primary_path.clone(), partial_path(&record.primary_path)];
        files.extend(record.secondary_path.iter().cloned());
        for path in &files {
            self.fs
                .remove_file(path)
                .await
                .map_err(|e| ModelError::storage(format!("remove {}", path.display()), e))?;
        }

        // Multi-file models live in their own directory
        if record.secondary_path.is_some() {
            if let Some(dir) = record.primary_path.parent() {
                if let Err(e) = self.fs.remove_empty_dir(dir).await {
                    warn!("Failed to remove {}: {}", dir.display(), e);
                }
            }
        }

        state.store.remove(model_id).await?;
        info!("Deleted model {}", model_id);
        Ok(true)
    }

    // Catalog cache

    /// Refetch every catalog, ignoring the TTL
    ///
    /// Every catalog is attempted; the first error is returned.
    pub async fn refresh_catalog(&self) -> Result<(), ModelError> {
        let state = self.initialized()?;
        let mut first_error = None;
        for catalog in &state.catalogs {
            if let Err(e) = catalog.refresh().await {
                warn!("Refreshing {} catalog failed: {}", catalog.family(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drop cached catalogs in memory and on disk
    pub async fn clear_catalog_cache(&self) -> Result<(), ModelError> {
        let state = self.initialized()?;
        let mut first_error = None;
        for catalog in &state.catalogs {
            if let Err(e) = catalog.clear_cache().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn local_copy(
        &self,
        state: &Initialized,
        model_id: &str,
    ) -> Option<(LocalModelRecord, u64)> {
        let record = state.store.get(model_id).await?;
        let size = self.primary_size(&record).await?;
        Some((record, size))
    }

    async fn primary_size(&self, record: &LocalModelRecord) -> Option<u64> {
        match self.fs.file_size(&record.primary_path).await {
            Ok(size) => size,
            Err(e) => {
                warn!("Failed to stat {}: {}", record.primary_path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{payload, FakeTransport, PartialMoveFailsFs, ProgressLog, BASE_URL};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use voxkit_core::{
        FileRole, ManualClock, ModelAttributes, RemoteFile, WhisperAttributes, WhisperSize,
    };

    const TINY_URL: &str = "http://hub.test/ggerganov/whisper.cpp/resolve/main/ggml-tiny.en.bin";

    fn tiny() -> ModelDescriptor {
        ModelDescriptor {
            id: "ggml-tiny.en.bin".into(),
            display_name: "Whisper Tiny (English)".into(),
            size_bytes: 1000,
            model_type: ModelType::WHISPER,
            files: vec![RemoteFile {
                url: TINY_URL.into(),
                file_name: "ggml-tiny.en.bin".into(),
                role: FileRole::Primary,
                size_bytes: 1000,
                checksum: None,
            }],
            attributes: ModelAttributes::Whisper(WhisperAttributes {
                size: WhisperSize::Tiny,
                english_only: true,
                quantization: None,
            }),
        }
    }

    async fn registry(dir: &Path, transport: Arc<FakeTransport>) -> ModelRegistry {
        let registry = ModelRegistry::new(
            Arc::new(LocalFileSystem),
            transport,
            Arc::new(ManualClock::new(1_700_000_000_000)),
        );
        let config = RegistryConfig::default()
            .with_models_dir(dir)
            .with_base_url(BASE_URL)
            .with_buffer_size(100);
        registry.initialize(config).await.unwrap();
        registry
    }

    fn terminal_count(events: &[DownloadProgress]) -> usize {
        events.iter().filter(|p| p.state.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let registry = ModelRegistry::new(
            Arc::new(LocalFileSystem),
            FakeTransport::new(),
            Arc::new(ManualClock::new(0)),
        );
        let log = ProgressLog::default();

        let err = registry.download(&tiny(), |p| log.record(p)).await.unwrap_err();
        assert!(matches!(err, ModelError::NotInitialized));
        assert!(log.events().is_empty());

        assert!(matches!(registry.list_local().await, Err(ModelError::NotInitialized)));
        assert!(matches!(registry.delete("x").await, Err(ModelError::NotInitialized)));
        assert!(matches!(registry.whisper_models().await, Err(ModelError::NotInitialized)));
        assert!(!registry.cancel("x"));
    }

    #[tokio::test]
    async fn test_with_defaults_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig::default()
            .with_models_dir(dir.path().join("models"))
            .with_user_agent("dictation-app/2.1");

        let registry = ModelRegistry::with_defaults(&config).unwrap();
        registry.initialize(config.clone()).await.unwrap();

        assert_eq!(registry.config().unwrap(), config);
        assert!(dir.path().join("models").is_dir());
        assert!(registry.list_local().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_persists_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = registry(dir.path(), transport).await;
        let log = ProgressLog::default();

        let record = registry.download(&tiny(), |p| log.record(p)).await.unwrap();

        assert_eq!(record.downloaded_at_millis, 1_700_000_000_000);
        assert_eq!(registry.get_local("ggml-tiny.en.bin").await.unwrap(), Some(record));
        assert!(!registry.is_downloading("ggml-tiny.en.bin"));

        let events = log.events();
        assert_eq!(events.first().unwrap().state, DownloadState::Pending);
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(*events.last().unwrap(), DownloadProgress::completed(1000));
    }

    #[tokio::test]
    async fn test_existing_model_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = registry(dir.path(), transport.clone()).await;
        registry.download(&tiny(), |_| {}).await.unwrap();
        assert_eq!(transport.request_count(), 1);

        let log = ProgressLog::default();
        registry.download(&tiny(), |p| log.record(p)).await.unwrap();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(
            log.events(),
            vec![DownloadProgress::pending(), DownloadProgress::completed(1000)]
        );
    }

    #[tokio::test]
    async fn test_cancel_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = registry(dir.path(), transport.clone()).await;
        let dest = dir.path().join("whisper").join("ggml-tiny.en.bin");

        let log = ProgressLog::default();
        let err = registry
            .download(&tiny(), |p| {
                log.record(p);
                if p.bytes_downloaded >= 400 {
                    registry.cancel("ggml-tiny.en.bin");
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(terminal_count(&log.events()), 1);
        assert_eq!(log.events().last().unwrap().state, DownloadState::Cancelled);
        assert_eq!(std::fs::metadata(partial_path(&dest)).unwrap().len(), 400);
        assert!(registry.get_local("ggml-tiny.en.bin").await.unwrap().is_none());

        let record = registry.download(&tiny(), |_| {}).await.unwrap();
        assert_eq!(std::fs::metadata(&record.primary_path).unwrap().len(), 1000);
        assert_eq!(transport.requests_for(TINY_URL)[1].range_start, Some(400));
    }

    /// Lets queued requests through once a second call has joined
    async fn release_after_join(registry: &ModelRegistry, gate: &tokio::sync::Notify) {
        while registry.joiners("ggml-tiny.en.bin") == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_concurrent_downloads_share_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let gate = transport.hold_requests();
        let registry = registry(dir.path(), transport.clone()).await;

        let descriptor = tiny();
        let first_log = ProgressLog::default();
        let second_log = ProgressLog::default();
        let (first, second, _) = tokio::join!(
            registry.download(&descriptor, |p| first_log.record(p)),
            registry.download(&descriptor, |p| second_log.record(p)),
            release_after_join(&registry, &gate),
        );

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(transport.requests_for(TINY_URL).len(), 1);
        assert_eq!(terminal_count(&first_log.events()), 1);
        assert_eq!(terminal_count(&second_log.events()), 1);
        assert_eq!(second_log.events().last().unwrap().state, DownloadState::Completed);
        assert!(!registry.is_downloading("ggml-tiny.en.bin"));
    }

    #[tokio::test]
    async fn test_joiner_sees_leader_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve_status(TINY_URL, 503);
        let gate = transport.hold_requests();
        let registry = registry(dir.path(), transport.clone()).await;

        let descriptor = tiny();
        let first_log = ProgressLog::default();
        let second_log = ProgressLog::default();
        let (first, second, _) = tokio::join!(
            registry.download(&descriptor, |p| first_log.record(p)),
            registry.download(&descriptor, |p| second_log.record(p)),
            release_after_join(&registry, &gate),
        );

        // Either call may have led
        let errors = [first.unwrap_err(), second.unwrap_err()];
        assert!(errors.iter().all(|e| e.kind() == ErrorKind::Network));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ModelError::HttpStatus { status: 503, .. })));
        assert_eq!(transport.request_count(), 1);
        for log in [&first_log, &second_log] {
            let events = log.events();
            assert_eq!(terminal_count(&events), 1);
            assert_eq!(events.last().unwrap().state, DownloadState::Failed);
        }
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = ModelRegistry::new(
            Arc::new(PartialMoveFailsFs),
            transport,
            Arc::new(ManualClock::new(0)),
        );
        let config = RegistryConfig::default()
            .with_models_dir(dir.path())
            .with_base_url(BASE_URL);
        registry.initialize(config).await.unwrap();
        let log = ProgressLog::default();

        let err = registry.download(&tiny(), |p| log.record(p)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(terminal_count(&log.events()), 1);
        assert_eq!(log.events().last().unwrap().state, DownloadState::Failed);
        let store = MetadataStore::new(Arc::new(LocalFileSystem), dir.path());
        assert!(store.get("ggml-tiny.en.bin").await.is_none());
        assert!(!dir.path().join("registry_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_unknown_type_has_no_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), FakeTransport::new()).await;
        let mut descriptor = tiny();
        descriptor.model_type = ModelType::new("KOKORO");
        descriptor.attributes = ModelAttributes::Other(BTreeMap::new());
        let log = ProgressLog::default();

        let err = registry.download(&descriptor, |p| log.record(p)).await.unwrap_err();

        assert!(matches!(err, ModelError::NoStrategy(_)));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(
            log.events(),
            vec![DownloadProgress::pending(), DownloadProgress::failed()]
        );
    }

    struct KokoroStrategy {
        models_dir: std::path::PathBuf,
    }

    #[async_trait]
    impl DownloadStrategy for KokoroStrategy {
        fn supports(&self, descriptor: &ModelDescriptor) -> bool {
            descriptor.model_type.as_str() == "KOKORO"
        }

        async fn download(
            &self,
            descriptor: &ModelDescriptor,
            _cancel: &CancellationToken,
            _on_progress: &crate::ProgressFn<'_>,
        ) -> Result<LocalModelRecord, ModelError> {
            let path = self.models_dir.join(&descriptor.id);
            std::fs::write(&path, b"voice").unwrap();
            Ok(LocalModelRecord {
                model_id: descriptor.id.clone(),
                model_type: descriptor.model_type.clone(),
                primary_path: path,
                secondary_path: None,
                downloaded_at_millis: 5,
            })
        }
    }

    #[tokio::test]
    async fn test_registered_strategy_handles_new_family() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), FakeTransport::new()).await;
        registry
            .register_strategy(Arc::new(KokoroStrategy {
                models_dir: dir.path().to_path_buf(),
            }))
            .unwrap();

        let mut descriptor = tiny();
        descriptor.id = "kokoro-v1".into();
        descriptor.model_type = ModelType::new("KOKORO");
        let log = ProgressLog::default();

        let record = registry.download(&descriptor, |p| log.record(p)).await.unwrap();

        assert_eq!(record.model_type.as_str(), "KOKORO");
        assert_eq!(*log.events().last().unwrap(), DownloadProgress::completed(5));
        assert_eq!(registry.list_local().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), FakeTransport::new()).await;

        assert!(!registry.delete("missing").await.unwrap());
        assert!(!dir.path().join("registry_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_delete_piper_voice_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), FakeTransport::new()).await;

        let voice_dir = dir.path().join("piper").join("en_US-amy-low");
        std::fs::create_dir_all(&voice_dir).unwrap();
        let model = voice_dir.join("en_US-amy-low.onnx");
        let config = voice_dir.join("en_US-amy-low.onnx.json");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(&config, b"{}").unwrap();

        let store = MetadataStore::new(Arc::new(LocalFileSystem), dir.path());
        store
            .add(LocalModelRecord {
                model_id: "en_US-amy-low".into(),
                model_type: ModelType::PIPER,
                primary_path: model.clone(),
                secondary_path: Some(config.clone()),
                downloaded_at_millis: 1,
            })
            .await
            .unwrap();
        assert_eq!(registry.storage_usage().await.unwrap(), 6);

        assert!(registry.delete("en_US-amy-low").await.unwrap());
        assert!(!model.exists());
        assert!(!config.exists());
        assert!(!voice_dir.exists());
        assert!(registry.list_local().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_leftover_partial() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = registry(dir.path(), transport).await;

        let record = registry.download(&tiny(), |_| {}).await.unwrap();
        let part = partial_path(&record.primary_path);
        std::fs::write(&part, payload(10)).unwrap();
        let whisper_dir = record.primary_path.parent().unwrap().to_path_buf();

        assert!(registry.delete(&record.model_id).await.unwrap());
        assert!(!record.primary_path.exists());
        assert!(!part.exists());
        // Single-file models share the family directory
        assert!(whisper_dir.exists());
        assert!(registry.get_local(&record.model_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_hides_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(TINY_URL, payload(1000));
        let registry = registry(dir.path(), transport.clone()).await;

        let record = registry.download(&tiny(), |_| {}).await.unwrap();
        std::fs::remove_file(&record.primary_path).unwrap();

        assert!(registry.get_local(&record.model_id).await.unwrap().is_none());
        assert!(registry.list_local().await.unwrap().is_empty());

        // A missing file means the next download fetches again
        registry.download(&tiny(), |_| {}).await.unwrap();
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_discover_and_unknown_family() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(
            "http://hub.test/api/models/ggerganov/whisper.cpp",
            r#"{ "siblings": [ { "rfilename": "ggml-tiny.en.bin" } ] }"#,
        );
        let registry = registry(dir.path(), transport.clone()).await;

        let models = registry.whisper_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].primary_file().unwrap().url, TINY_URL);

        let err = registry
            .discover(&ModelType::new("KOKORO"), &CatalogFilter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownFamily(_)));
    }

    #[tokio::test]
    async fn test_refresh_attempts_every_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.serve(
            "http://hub.test/api/models/ggerganov/whisper.cpp",
            r#"{ "siblings": [] }"#,
        );
        let registry = registry(dir.path(), transport.clone()).await;

        // Piper manifest is not served, so its refresh fails
        let err = registry.refresh_catalog().await.unwrap_err();
        assert!(matches!(err, ModelError::HttpStatus { status: 404, .. }));
        assert_eq!(transport.request_count(), 2);
        assert!(dir.path().join("whisper_catalog_cache.json").exists());

        registry.clear_catalog_cache().await.unwrap();
        assert!(!dir.path().join("whisper_catalog_cache.json").exists());
    }
}
