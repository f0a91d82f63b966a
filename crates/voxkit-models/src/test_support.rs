//! In-memory HTTP server double shared by the unit tests

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use voxkit_core::transport::{STATUS_OK, STATUS_PARTIAL_CONTENT, STATUS_RANGE_NOT_SATISFIABLE};
use voxkit_core::{
    DownloadProgress, FileSystem, FileWriter, HttpRequest, HttpResponse, HttpTransport,
    LocalFileSystem, TransportError,
};

pub const BASE_URL: &str = "http://hub.test";

struct Resource {
    body: Vec<u8>,
    status: u16,
    honor_ranges: bool,
    declared_length: Option<u64>,
}

/// Serves registered byte bodies, honoring `Range` unless told otherwise
#[derive(Default)]
pub struct FakeTransport {
    resources: Mutex<HashMap<String, Resource>>,
    requests: Mutex<Vec<HttpRequest>>,
    offline: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn insert(&self, url: &str, resource: Resource) {
        self.resources.lock().unwrap().insert(url.to_string(), resource);
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.insert(
            url,
            Resource {
                body: body.into(),
                status: STATUS_OK,
                honor_ranges: true,
                declared_length: None,
            },
        );
    }

    pub fn serve_without_ranges(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.insert(
            url,
            Resource {
                body: body.into(),
                status: STATUS_OK,
                honor_ranges: false,
                declared_length: None,
            },
        );
    }

    /// Serve a body whose Content-Length header lies
    pub fn serve_with_declared_length(&self, url: &str, body: impl Into<Vec<u8>>, declared: u64) {
        self.insert(
            url,
            Resource {
                body: body.into(),
                status: STATUS_OK,
                honor_ranges: false,
                declared_length: Some(declared),
            },
        );
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.insert(
            url,
            Resource {
                body: Vec::new(),
                status,
                honor_ranges: false,
                declared_length: None,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Park the next request until the returned gate is notified
    pub fn hold_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn requests_for(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("network unreachable".into()));
        }
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let resources = self.resources.lock().unwrap();
        let Some(resource) = resources.get(&request.url) else {
            return Ok(response(404, Vec::new(), None));
        };

        if resource.status != STATUS_OK {
            return Ok(response(resource.status, Vec::new(), None));
        }

        match request.range_start {
            Some(start) if resource.honor_ranges => {
                let start = start as usize;
                if start >= resource.body.len() {
                    return Ok(response(STATUS_RANGE_NOT_SATISFIABLE, Vec::new(), None));
                }
                let rest = resource.body[start..].to_vec();
                let len = rest.len() as u64;
                Ok(response(STATUS_PARTIAL_CONTENT, rest, Some(len)))
            }
            _ => {
                let len = resource.declared_length.unwrap_or(resource.body.len() as u64);
                Ok(response(STATUS_OK, resource.body.clone(), Some(len)))
            }
        }
    }
}

fn response(status: u16, body: Vec<u8>, content_length: Option<u64>) -> HttpResponse {
    HttpResponse {
        status,
        content_length,
        headers: HashMap::new(),
        body: Box::new(Cursor::new(body)),
    }
}

/// Collects progress events for assertions
#[derive(Default, Clone)]
pub struct ProgressLog {
    events: Arc<Mutex<Vec<DownloadProgress>>>,
}

impl ProgressLog {
    pub fn record(&self, progress: DownloadProgress) {
        self.events.lock().unwrap().push(progress);
    }

    pub fn events(&self) -> Vec<DownloadProgress> {
        self.events.lock().unwrap().clone()
    }
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Local disk that refuses to move finished `.part` files into place
pub struct PartialMoveFailsFs;

#[async_trait]
impl FileSystem for PartialMoveFailsFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        LocalFileSystem.create_dir_all(path).await
    }
    async fn exists(&self, path: &Path) -> bool {
        LocalFileSystem.exists(path).await
    }
    async fn file_size(&self, path: &Path) -> io::Result<Option<u64>> {
        LocalFileSystem.file_size(path).await
    }
    async fn remove_file(&self, path: &Path) -> io::Result<bool> {
        LocalFileSystem.remove_file(path).await
    }
    async fn remove_empty_dir(&self, path: &Path) -> io::Result<bool> {
        LocalFileSystem.remove_empty_dir(path).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if from.to_string_lossy().ends_with(crate::engine::PARTIAL_SUFFIX) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        LocalFileSystem.rename(from, to).await
    }
    async fn read_to_string(&self, path: &Path) -> io::Result<Option<String>> {
        LocalFileSystem.read_to_string(path).await
    }
    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        LocalFileSystem.write_string(path, contents).await
    }
    async fn open_writer(&self, path: &Path, append: bool) -> io::Result<FileWriter> {
        LocalFileSystem.open_writer(path, append).await
    }
}
