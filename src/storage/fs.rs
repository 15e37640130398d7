use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Result of a `stat` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    pub fn missing() -> Self {
        Self {
            exists: false,
            size_bytes: 0,
            modified: None,
        }
    }
}

/// Device file store capability
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Copy `from` to `to`, returning the number of bytes copied
    async fn copy(&self, from: &Path, to: &Path) -> Result<u64>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Missing files report `exists: false` rather than an error
    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Idempotent delete. Returns `false` when the target was already absent.
    async fn delete(&self, path: &Path) -> Result<bool>;

    /// List the files of a directory, skipping subdirectories. A missing
    /// directory lists as empty.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn read(&self, path: &Path) -> Result<Bytes>;

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
}

/// `FileStore` backed by the local filesystem through `tokio::fs`
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| PipelineError::storage(path, e))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        fs::copy(from, to)
            .await
            .map_err(|e| PipelineError::storage(from, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
            .await
            .map_err(|e| PipelineError::storage(to, e))
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(FileStat {
                exists: true,
                size_bytes: metadata.len(),
                modified: metadata.modified().ok(),
            }),
            Ok(_) => Ok(FileStat::missing()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileStat::missing()),
            Err(e) => Err(PipelineError::storage(path, e)),
        }
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PipelineError::storage(path, e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::storage(path, e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage(path, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_file())
                .unwrap_or(false);
            if is_file {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| PipelineError::storage(path, e))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        fs::write(path, data)
            .await
            .map_err(|e| PipelineError::storage(path, e))
    }
}
