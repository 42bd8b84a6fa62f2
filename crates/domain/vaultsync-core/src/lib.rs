use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub mod formats;
pub mod path_utils;
pub mod tree;

pub use tree::{FileNode, FileTree, NodeKind};

pub type ContentHash = String;

/// Sync metadata for a whole vault, keyed by vault-relative path.
pub type SyncMetadata = BTreeMap<String, SyncMetadataEntry>;

/// One tracked note on disk. Rebuilt from the live tree on every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub path: Utf8PathBuf,
    /// Forward-slash normalized path relative to the vault root.
    pub relative_path: String,
    pub content: String,
    pub content_hash: ContentHash,
    /// Last-synced version; 1 when the file has never been synced.
    pub version: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadataEntry {
    pub version: u64,
    pub hash: ContentHash,
    pub last_synced: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncActionKind {
    None,
    Upload,
    Download,
}

/// A planned operation for one path. Server-reported conflicts have already
/// been folded into `Upload` by the time an action is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub relative_path: String,
    /// Resolved absolute path when the file exists locally.
    pub local_path: Option<Utf8PathBuf>,
    pub kind: SyncActionKind,
    pub server_version: u64,
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub file_id: Option<String>,
    pub relative_path: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPayload {
    Upload(LocalFileRecord),
    Download(DownloadTarget),
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Upload(_) => OperationKind::Upload,
            OperationPayload::Download(_) => OperationKind::Download,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            OperationPayload::Upload(file) => &file.relative_path,
            OperationPayload::Download(target) => &target.relative_path,
        }
    }
}

/// A unit of scheduled work. Higher `priority` runs first.
#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub priority: u32,
    pub vault_id: String,
    pub vault_path: Utf8PathBuf,
    pub payload: OperationPayload,
    pub retries: u32,
    pub max_retries: u32,
}

impl QueuedOperation {
    pub fn new(
        vault_id: impl Into<String>,
        vault_path: impl Into<Utf8PathBuf>,
        payload: OperationPayload,
        priority: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            vault_id: vault_id.into(),
            vault_path: vault_path.into(),
            payload,
            retries: 0,
            max_retries,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// Result of one successfully executed upload or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub relative_path: String,
    pub kind: OperationKind,
    pub version: u64,
    pub content_hash: ContentHash,
    /// Set when the operation went through conflict resolution.
    pub resolved_conflict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub status: SyncStatus,
}

impl SyncProgress {
    pub fn settled(&self) -> u64 {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Upload,
    Download,
}

/// Details the remote reports when it rejects an upload on a version mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub current_server_version: u64,
    pub attempted_version: u64,
    #[serde(default)]
    pub current_server_hash: Option<ContentHash>,
    #[serde(default)]
    pub message: String,
}

/// Everything the human needs to decide a single conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub relative_path: String,
    pub local_version: u64,
    pub server_version: u64,
    pub local_content: String,
    pub server_content: String,
    pub detail: ConflictDetail,
    pub conflict_type: ConflictType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConflictResolution {
    KeepLocal,
    UseServer,
    Merge {
        #[serde(rename = "mergedContent")]
        merged_content: String,
    },
}
