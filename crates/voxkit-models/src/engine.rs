//! Resumable single-file transfer

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxkit_core::transport::STATUS_RANGE_NOT_SATISFIABLE;
use voxkit_core::{
    DownloadProgress, FileSystem, HttpRequest, HttpResponse, HttpTransport, TransportError,
};

use crate::error::ModelError;
use crate::strategy::ProgressFn;

/// Suffix appended to the destination while a transfer is incomplete
pub const PARTIAL_SUFFIX: &str = ".part";

/// Path holding the partial transfer for `destination`
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Downloads one file with resume, progress and cancellation
///
/// Bytes are streamed into `<destination>.part`, which is renamed onto the
/// destination only after the whole body was received. A later call for the
/// same destination resumes from the partial file when the server honors
/// range requests.
pub struct DownloadEngine {
    transport: Arc<dyn HttpTransport>,
    fs: Arc<dyn FileSystem>,
    buffer_size: usize,
}

impl DownloadEngine {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        fs: Arc<dyn FileSystem>,
        buffer_size: usize,
    ) -> Self {
        Self {
            transport,
            fs,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Download `url` to `destination`, returning the final file size
    ///
    /// Emits `Downloading` after every chunk, then exactly one of
    /// `Completed`, `Failed` or `Cancelled`. A cancelled transfer leaves the
    /// partial file in place.
    pub async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        on_progress: &ProgressFn<'_>,
    ) -> Result<u64, ModelError> {
        match self.run(url, destination, cancel, on_progress).await {
            Ok(size) => {
                on_progress(DownloadProgress::completed(size));
                Ok(size)
            }
            Err(ModelError::Cancelled) => {
                info!("Transfer of {} cancelled", url);
                on_progress(DownloadProgress::cancelled());
                Err(ModelError::Cancelled)
            }
            Err(e) => {
                warn!("Transfer of {} failed: {}", url, e);
                on_progress(DownloadProgress::failed());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        on_progress: &ProgressFn<'_>,
    ) -> Result<u64, ModelError> {
        if let Some(parent) = destination.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| ModelError::storage(format!("create {}", parent.display()), e))?;
        }

        let temp_path = partial_path(destination);
        let mut offset = self
            .fs
            .file_size(&temp_path)
            .await
            .map_err(|e| ModelError::storage(format!("stat {}", temp_path.display()), e))?
            .unwrap_or(0);

        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        if offset > 0 {
            debug!("Found {} bytes at {}, requesting resume", offset, temp_path.display());
        }
        let mut response = self.request(url, offset).await?;

        if offset > 0 && response.status == STATUS_RANGE_NOT_SATISFIABLE {
            debug!("Server rejected range for {}, starting over", url);
            self.discard(&temp_path).await?;
            offset = 0;
            response = self.request(url, 0).await?;
        }

        if !response.is_success() {
            return Err(ModelError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }

        let resuming = offset > 0 && response.is_partial_content();
        if offset > 0 && !resuming {
            debug!("Server ignored range for {}, starting over", url);
            self.discard(&temp_path).await?;
            offset = 0;
        }

        // Ranged responses only declare the remaining length
        let total_bytes = response.content_length.map(|len| len + offset).unwrap_or(0);

        let mut file = self
            .fs
            .open_writer(&temp_path, resuming)
            .await
            .map_err(|e| ModelError::storage(format!("open {}", temp_path.display()), e))?;

        let mut downloaded = offset;
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let read = response
                .body
                .read(&mut buffer)
                .await
                .map_err(|e| ModelError::Transport(TransportError::Body(e)))?;
            if read == 0 {
                break;
            }

            file.write_all(&buffer[..read])
                .await
                .map_err(|e| ModelError::storage(format!("write {}", temp_path.display()), e))?;
            downloaded += read as u64;

            on_progress(DownloadProgress::downloading(downloaded, total_bytes));

            if cancel.is_cancelled() {
                file.flush()
                    .await
                    .map_err(|e| ModelError::storage(format!("flush {}", temp_path.display()), e))?;
                debug!("Keeping {} bytes at {} for resume", downloaded, temp_path.display());
                return Err(ModelError::Cancelled);
            }
        }

        file.flush()
            .await
            .map_err(|e| ModelError::storage(format!("flush {}", temp_path.display()), e))?;
        drop(file);

        self.fs
            .remove_file(destination)
            .await
            .map_err(|e| ModelError::storage(format!("remove {}", destination.display()), e))?;
        self.fs
            .rename(&temp_path, destination)
            .await
            .map_err(|e| ModelError::storage(format!("move to {}", destination.display()), e))?;

        let size = self
            .fs
            .file_size(destination)
            .await
            .map_err(|e| ModelError::storage(format!("stat {}", destination.display()), e))?
            .unwrap_or(downloaded);

        info!("Downloaded {} ({} bytes)", destination.display(), size);
        Ok(size)
    }

    async fn request(&self, url: &str, offset: u64) -> Result<HttpResponse, ModelError> {
        let request = HttpRequest::get(url).with_range_from(offset);
        Ok(self.transport.get(request).await?)
    }

    async fn discard(&self, temp_path: &Path) -> Result<(), ModelError> {
        self.fs
            .remove_file(temp_path)
            .await
            .map(|_| ())
            .map_err(|e| ModelError::storage(format!("remove {}", temp_path.display()), e))
    }
}
