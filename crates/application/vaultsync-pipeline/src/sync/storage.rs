use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use vaultsync_core::{ContentHash, SyncMetadata, SyncMetadataEntry};

use crate::sync::local::FileSystem;
use crate::sync::SyncError;

/// Per-vault sync metadata, persisted as one hidden JSON file at the vault root.
///
/// `read`/`write` are plain whole-file operations. `update` and `record`
/// additionally serialize the read-modify-write per vault, so two operations
/// finishing at the same time cannot drop each other's entries.
pub struct MetadataStore {
    fs: Arc<dyn FileSystem>,
    file_name: String,
    locks: Mutex<HashMap<Utf8PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl MetadataStore {
    pub fn new(fs: Arc<dyn FileSystem>, file_name: impl Into<String>) -> Self {
        Self {
            fs,
            file_name: file_name.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn metadata_path(&self, vault_path: &Utf8Path) -> Utf8PathBuf {
        vault_path.join(&self.file_name)
    }

    /// Never fails: a missing file is created empty, anything else unreadable
    /// is logged and treated as "nothing known to be synced".
    pub async fn read(&self, vault_path: &Utf8Path) -> SyncMetadata {
        self.load(vault_path, true).await
    }

    /// Like [`read`](Self::read), but leaves a missing file missing.
    pub async fn peek(&self, vault_path: &Utf8Path) -> SyncMetadata {
        self.load(vault_path, false).await
    }

    async fn load(&self, vault_path: &Utf8Path, create_missing: bool) -> SyncMetadata {
        let path = self.metadata_path(vault_path);
        match self.fs.read_file(&path).await {
            Ok(raw) => match serde_json::from_str::<SyncMetadata>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Sync metadata at {} is unreadable, ignoring it: {}", path, e);
                    SyncMetadata::new()
                }
            },
            Err(e) if e.is_not_found() => {
                let empty = SyncMetadata::new();
                if create_missing {
                    debug!("No sync metadata at {}, creating it", path);
                    if let Err(e) = self.write(vault_path, &empty).await {
                        warn!("Failed to create sync metadata at {}: {}", path, e);
                    }
                }
                empty
            }
            Err(e) => {
                warn!("Failed to read sync metadata at {}: {}", path, e);
                SyncMetadata::new()
            }
        }
    }

    pub async fn write(&self, vault_path: &Utf8Path, metadata: &SyncMetadata) -> Result<(), SyncError> {
        let path = self.metadata_path(vault_path);
        let data = serde_json::to_string_pretty(metadata)
            .map_err(|e| SyncError::Metadata(format!("serialize {path}: {e}")))?;
        self.fs
            .write_file(&path, &data)
            .await
            .map_err(|e| SyncError::Metadata(format!("write {path}: {e}")))
    }

    /// Read-modify-write under the vault's lock.
    pub async fn update<F>(&self, vault_path: &Utf8Path, mutate: F) -> Result<SyncMetadata, SyncError>
    where
        F: FnOnce(&mut SyncMetadata) + Send,
    {
        let lock = self.vault_lock(vault_path);
        let _guard = lock.lock().await;

        let mut metadata = self.read(vault_path).await;
        mutate(&mut metadata);
        self.write(vault_path, &metadata).await?;
        Ok(metadata)
    }

    /// Mark `relative_path` as in sync at `version` with content `hash`, as of now.
    pub async fn record(
        &self,
        vault_path: &Utf8Path,
        relative_path: &str,
        version: u64,
        hash: ContentHash,
    ) -> Result<(), SyncError> {
        let entry = SyncMetadataEntry {
            version,
            hash,
            last_synced: Utc::now(),
        };
        debug!(path = relative_path, version, "recording sync metadata");
        self.update(vault_path, |metadata| {
            metadata.insert(relative_path.to_string(), entry);
        })
        .await
        .map(|_| ())
    }

    fn vault_lock(&self, vault_path: &Utf8Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(vault_path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
