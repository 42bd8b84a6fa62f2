use camino::Utf8Path;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;

use crate::io_utils::robust_rename;
use crate::sync::SyncError;

/// File access used by the sync engine. Paths are absolute.
///
/// Implementations must report a missing file as [`SyncError::NotFound`] so the
/// metadata store can tell "first run" apart from a real read failure.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &Utf8Path) -> Result<String, SyncError>;
    async fn write_file(&self, path: &Utf8Path, content: &str) -> Result<(), SyncError>;
    async fn ensure_dir(&self, path: &Utf8Path) -> Result<(), SyncError>;
    async fn modified(&self, path: &Utf8Path) -> Result<Option<DateTime<Utc>>, SyncError>;
}

/// Disk-backed file system on top of `tokio::fs`.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Utf8Path, op: &str, e: std::io::Error) -> SyncError {
    if e.kind() == ErrorKind::NotFound {
        SyncError::NotFound(path.to_string())
    } else {
        SyncError::Local(format!("{op} {path}: {e}"))
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_file(&self, path: &Utf8Path) -> Result<String, SyncError> {
        tokio::fs::read_to_string(path.as_std_path())
            .await
            .map_err(|e| io_error(path, "read", e))
    }

    /// Writes to a `.tmp` sibling and renames it into place, so a crash never
    /// leaves a half-written note or metadata file behind.
    async fn write_file(&self, path: &Utf8Path, content: &str) -> Result<(), SyncError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| SyncError::Local(format!("write {path}: no file name")))?;
        let tmp = path.with_file_name(format!("{file_name}.tmp"));

        tokio::fs::write(tmp.as_std_path(), content)
            .await
            .map_err(|e| io_error(&tmp, "write", e))?;
        if let Err(e) = robust_rename(tmp.as_std_path(), path.as_std_path()).await {
            let _ = tokio::fs::remove_file(tmp.as_std_path()).await;
            return Err(io_error(path, "rename", e));
        }
        Ok(())
    }

    async fn ensure_dir(&self, path: &Utf8Path) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(path.as_std_path())
            .await
            .map_err(|e| io_error(path, "create dir", e))
    }

    async fn modified(&self, path: &Utf8Path) -> Result<Option<DateTime<Utc>>, SyncError> {
        let meta = tokio::fs::metadata(path.as_std_path())
            .await
            .map_err(|e| io_error(path, "stat", e))?;
        Ok(meta.modified().ok().map(DateTime::<Utc>::from))
    }
}
