use super::fs::{FileStat, FileStore, LocalFileStore};
use crate::{
    config::StorageConfig,
    error::{PipelineError, Result},
    events::{EventBus, PipelineEvent},
    media::{MediaAsset, MediaKind},
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PARTIAL_SUFFIX: &str = "partial";

/// Which managed files a purge removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PurgeScope {
    /// Cache area only (session files and processed results)
    Session,
    /// Cache and durable areas
    All,
}

/// Outcome of a purge
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    pub files_removed: usize,
    pub already_absent: usize,
}

/// Cache/durable storage for captured assets.
///
/// Every mutating operation runs under one async lock, so a purge can never
/// interleave with a cache or promote of the same session.
pub struct LocalMediaStore {
    config: StorageConfig,
    fs: Arc<dyn FileStore>,
    event_bus: Arc<EventBus>,
    op_lock: Arc<tokio::sync::Mutex<()>>,
    live: Arc<Mutex<HashMap<MediaKind, MediaAsset>>>,
}

impl LocalMediaStore {
    /// Create a store over the given file store capability
    pub fn new(config: StorageConfig, fs: Arc<dyn FileStore>, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            fs,
            event_bus,
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a store on the local filesystem
    pub fn with_local_fs(config: StorageConfig, event_bus: Arc<EventBus>) -> Self {
        Self::new(config, Arc::new(LocalFileStore::new()), event_bus)
    }

    /// Create the cache and durable directories
    pub async fn start(&self) -> Result<()> {
        self.fs.create_dir_all(&self.cache_path()).await?;
        self.fs.create_dir_all(&self.durable_path()).await?;
        info!(
            "Media store ready (cache: {}, durable: {})",
            self.cache_path().display(),
            self.durable_path().display()
        );
        Ok(())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config.cache_path()
    }

    pub fn durable_path(&self) -> PathBuf {
        self.config.durable_path()
    }

    /// Copy a raw capture into the cache and validate it.
    ///
    /// The copy lands under a `.partial` name and is only renamed into place
    /// once it exists with a non-zero size, so callers never see a reference
    /// to a half-written file. Caching a new asset of a kind replaces the
    /// previous live asset of that kind.
    pub async fn cache(&self, raw_uri: &Path, kind: MediaKind) -> Result<MediaAsset> {
        let _guard = self.op_lock.lock().await;

        let source = self.fs.stat(raw_uri).await?;
        if !source.exists {
            return Err(PipelineError::invalid_media(
                raw_uri,
                "captured file does not exist",
            ));
        }

        let cache_dir = self.cache_path();
        self.fs.create_dir_all(&cache_dir).await?;

        let id = Uuid::new_v4();
        let display_name = Self::file_name(kind, id);
        let final_path = cache_dir.join(&display_name);
        let stat = self.copy_validated(raw_uri, &final_path).await?;

        let asset = MediaAsset {
            id,
            kind,
            source_uri: raw_uri.to_path_buf(),
            mime_type: kind.mime_type().to_string(),
            display_name,
            size_bytes: stat.size_bytes,
            storage_uri: final_path,
        };

        let previous = self.live.lock().insert(kind, asset.clone());
        if let Some(previous) = previous {
            if previous.storage_uri.starts_with(&cache_dir) {
                self.delete_quietly(&previous.storage_uri).await;
            }
        }

        debug!(
            "Cached {} {} -> {} ({} bytes)",
            kind,
            raw_uri.display(),
            asset.storage_uri.display(),
            asset.size_bytes
        );
        self.event_bus.publish(PipelineEvent::AssetCached {
            kind,
            path: asset.storage_uri.clone(),
            size_bytes: asset.size_bytes,
        });

        Ok(asset)
    }

    /// Copy a cached asset into the durable area.
    ///
    /// The durable name derives from the asset id, so promoting the same
    /// asset twice resolves to the same file.
    pub async fn promote(&self, asset: &MediaAsset) -> Result<MediaAsset> {
        let _guard = self.op_lock.lock().await;

        let durable_dir = self.durable_path();
        let durable_uri = durable_dir.join(Self::file_name(asset.kind, asset.id));

        let existing = self.fs.stat(&durable_uri).await?;
        if existing.exists && existing.size_bytes == asset.size_bytes {
            debug!("Asset {} already promoted to {}", asset.id, durable_uri.display());
            return Ok(Self::relocated(asset, durable_uri, existing.size_bytes));
        }

        self.fs.create_dir_all(&durable_dir).await?;
        let source = self.fs.stat(&asset.storage_uri).await?;
        if !source.exists {
            return Err(PipelineError::missing_input(format!(
                "{} file {}",
                asset.kind,
                asset.storage_uri.display()
            )));
        }

        let stat = self.copy_validated(&asset.storage_uri, &durable_uri).await?;
        info!("Promoted {} to {}", asset.id, durable_uri.display());

        let promoted = Self::relocated(asset, durable_uri, stat.size_bytes);
        self.live.lock().insert(asset.kind, promoted.clone());
        Ok(promoted)
    }

    /// Find the newest promoted asset of a kind left by an earlier run.
    ///
    /// Older promoted copies of the same kind are deleted, so only one
    /// survives across restarts.
    pub async fn recover_durable(&self, kind: MediaKind) -> Result<Option<MediaAsset>> {
        let _guard = self.op_lock.lock().await;

        let mut candidates = Vec::new();
        for path in self.fs.list_directory(&self.durable_path()).await? {
            let Some(id) = Self::parse_file_name(kind, &path) else {
                continue;
            };
            let stat = self.fs.stat(&path).await?;
            if stat.exists && stat.size_bytes > 0 {
                candidates.push((stat, id, path));
            }
        }

        candidates.sort_by_key(|(stat, _, path)| (stat.modified, path.clone()));
        let Some((stat, id, storage_uri)) = candidates.pop() else {
            return Ok(None);
        };

        for (_, _, stale) in &candidates {
            debug!("Removing superseded {} {}", kind, stale.display());
            self.delete_quietly(stale).await;
        }

        let display_name = Self::file_name(kind, id);
        let asset = MediaAsset {
            id,
            kind,
            source_uri: storage_uri.clone(),
            mime_type: kind.mime_type().to_string(),
            display_name,
            size_bytes: stat.size_bytes,
            storage_uri,
        };
        info!("Recovered durable {} {}", kind, asset.storage_uri.display());
        self.live.lock().insert(kind, asset.clone());
        Ok(Some(asset))
    }

    /// Re-check an asset on disk; cached metadata is never trusted
    pub async fn verify(&self, asset: &MediaAsset) -> Result<FileStat> {
        let stat = self.fs.stat(&asset.storage_uri).await?;
        if !stat.exists {
            return Err(PipelineError::missing_input(format!(
                "{} file {}",
                asset.kind,
                asset.storage_uri.display()
            )));
        }
        if stat.size_bytes == 0 {
            return Err(PipelineError::invalid_media(
                &asset.storage_uri,
                "file is empty",
            ));
        }
        Ok(stat)
    }

    /// Read an asset's bytes
    pub async fn read(&self, asset: &MediaAsset) -> Result<Bytes> {
        self.fs.read(&asset.storage_uri).await
    }

    /// Write a processed result into the cache under a fresh identity
    pub async fn write_result(&self, payload: &[u8]) -> Result<PathBuf> {
        let _guard = self.op_lock.lock().await;

        let cache_dir = self.cache_path();
        self.fs.create_dir_all(&cache_dir).await?;

        let path = cache_dir.join(format!("processed_image_{}.jpg", Uuid::new_v4().simple()));
        let partial = Self::partial_path(&path);

        if let Err(e) = self.fs.write(&partial, payload).await {
            self.delete_quietly(&partial).await;
            return Err(e);
        }
        self.fs.rename(&partial, &path).await?;

        debug!("Wrote result {} ({} bytes)", path.display(), payload.len());
        Ok(path)
    }

    /// Delete one managed file. Returns `false` if it was already gone.
    pub async fn discard(&self, path: &Path) -> Result<bool> {
        let _guard = self.op_lock.lock().await;
        self.live.lock().retain(|_, asset| asset.storage_uri != path);
        self.fs.delete(path).await
    }

    /// Delete cache-scoped (`Session`) or all managed (`All`) files.
    ///
    /// Files that are already gone count as satisfied and subdirectories are
    /// left alone. Any other delete failure is reported after every file has
    /// been attempted; assets whose files survive stay live.
    pub async fn purge(&self, scope: PurgeScope) -> Result<PurgeReport> {
        let _guard = self.op_lock.lock().await;

        let mut directories = vec![self.cache_path()];
        if scope == PurgeScope::All {
            directories.push(self.durable_path());
        }

        let mut report = PurgeReport::default();
        let mut cleared = Vec::new();
        let mut first_error = None;

        for directory in &directories {
            for path in self.fs.list_directory(directory).await? {
                match self.fs.delete(&path).await {
                    Ok(removed) => {
                        if removed {
                            report.files_removed += 1;
                        } else {
                            report.already_absent += 1;
                        }
                        cleared.push(path);
                    }
                    Err(e) => {
                        warn!("Failed to delete {}: {}", path.display(), e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
        }

        // Only forget assets whose files are actually gone
        self.live
            .lock()
            .retain(|_, asset| !cleared.contains(&asset.storage_uri));

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Purged {:?} storage: {} removed, {} already absent",
            scope, report.files_removed, report.already_absent
        );
        self.event_bus.publish(PipelineEvent::CachePurged {
            scope,
            files_removed: report.files_removed,
        });

        Ok(report)
    }

    /// The live asset of a kind, if any
    pub fn live_asset(&self, kind: MediaKind) -> Option<MediaAsset> {
        self.live.lock().get(&kind).cloned()
    }

    async fn copy_validated(&self, from: &Path, to: &Path) -> Result<FileStat> {
        let partial = Self::partial_path(to);

        if let Err(e) = self.fs.copy(from, &partial).await {
            self.delete_quietly(&partial).await;
            return Err(e);
        }

        let stat = self.fs.stat(&partial).await?;
        if !stat.exists || stat.size_bytes == 0 {
            self.delete_quietly(&partial).await;
            return Err(PipelineError::invalid_media(
                from,
                if stat.exists {
                    "copied file is empty"
                } else {
                    "copied file does not exist"
                },
            ));
        }

        if let Err(e) = self.fs.rename(&partial, to).await {
            self.delete_quietly(&partial).await;
            return Err(e);
        }

        Ok(stat)
    }

    async fn delete_quietly(&self, path: &Path) {
        if let Err(e) = self.fs.delete(path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }

    fn file_name(kind: MediaKind, id: Uuid) -> String {
        format!("{}_{}.{}", kind.file_prefix(), id.simple(), kind.extension())
    }

    /// Inverse of `file_name`; anything else in the area is ignored
    fn parse_file_name(kind: MediaKind, path: &Path) -> Option<Uuid> {
        let name = path.file_name()?.to_str()?;
        let id = name
            .strip_prefix(kind.file_prefix())?
            .strip_prefix('_')?
            .strip_suffix(kind.extension())?
            .strip_suffix('.')?;
        Uuid::try_parse(id).ok()
    }

    fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".");
        name.push(PARTIAL_SUFFIX);
        path.with_file_name(name)
    }

    fn relocated(asset: &MediaAsset, storage_uri: PathBuf, size_bytes: u64) -> MediaAsset {
        MediaAsset {
            storage_uri,
            size_bytes,
            ..asset.clone()
        }
    }
}

impl Clone for LocalMediaStore {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            fs: Arc::clone(&self.fs),
            event_bus: Arc::clone(&self.event_bus),
            op_lock: Arc::clone(&self.op_lock),
            live: Arc::clone(&self.live),
        }
    }
}
