//! File system capability

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWrite;
use tracing::debug;

/// Writer handed out by [`FileSystem::open_writer`]
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// File operations the registry needs from the host
///
/// Missing files are not errors: size and read queries return `None`,
/// removals return `false`.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    /// Size of a regular file
    async fn file_size(&self, path: &Path) -> io::Result<Option<u64>>;

    /// Remove a file, returning whether it existed
    async fn remove_file(&self, path: &Path) -> io::Result<bool>;

    /// Remove a directory only if it is empty
    async fn remove_empty_dir(&self, path: &Path) -> io::Result<bool>;

    /// Move a file, replacing the target
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn read_to_string(&self, path: &Path) -> io::Result<Option<String>>;

    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Open a file for streaming writes, appending or truncating
    async fn open_writer(&self, path: &Path, append: bool) -> io::Result<FileWriter>;
}

/// [`FileSystem`] backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

fn missing_as<T>(result: io::Result<T>, missing: T) -> io::Result<T> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(missing),
        other => other,
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn file_size(&self, path: &Path) -> io::Result<Option<u64>> {
        let metadata = missing_as(fs::metadata(path).await.map(Some), None)?;
        Ok(metadata.filter(|m| m.is_file()).map(|m| m.len()))
    }

    async fn remove_file(&self, path: &Path) -> io::Result<bool> {
        missing_as(fs::remove_file(path).await.map(|_| true), false)
    }

    async fn remove_empty_dir(&self, path: &Path) -> io::Result<bool> {
        missing_as(fs::remove_dir(path).await.map(|_| true), false)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        debug!("Moving {} -> {}", from.display(), to.display());
        fs::rename(from, to).await
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<Option<String>> {
        missing_as(fs::read_to_string(path).await.map(Some), None)
    }

    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents).await
    }

    async fn open_writer(&self, path: &Path, append: bool) -> io::Result<FileWriter> {
        let mut options = fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(path).await?;
        Ok(Box::new(file))
    }
}
