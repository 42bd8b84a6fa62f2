use vaultsync_config::{
    clamp_concurrency, DOWNLOAD_PRIORITY, MAX_CONCURRENT_OPERATIONS, MAX_RETRIES,
    METADATA_FILE_NAME, UPLOAD_PRIORITY,
};

pub mod conflict;
pub mod crypto;
pub mod engine;
pub mod execute;
pub mod local;
pub mod planner;
pub mod remote;
pub mod storage;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub upload_priority: u32,
    pub download_priority: u32,
    pub metadata_file_name: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_OPERATIONS,
            max_retries: MAX_RETRIES,
            upload_priority: UPLOAD_PRIORITY,
            download_priority: DOWNLOAD_PRIORITY,
            metadata_file_name: METADATA_FILE_NAME.to_string(),
        }
    }
}

impl SyncOptions {
    pub fn concurrency(&self) -> usize {
        clamp_concurrency(self.max_concurrent)
    }
}

/// High-level error type for sync operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Local I/O error: {0}")]
    Local(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Encryption not available: no active master key")]
    EncryptionUnavailable,
    #[error("Crypto error: {0}")]
    Crypto(String),
    #[error("Conflict resolution dismissed for {0}")]
    ConflictDismissed(String),
    #[error("Upload rejected for {path}: {message}")]
    UploadRejected { path: String, message: String },
    #[error("Metadata error: {0}")]
    Metadata(String),
    #[error("Operation cancelled before it started")]
    Cancelled,
    #[error("Security: {0}")]
    Security(String),
}

impl SyncError {
    /// Whether the scheduler may re-attempt an operation that failed with this error.
    /// Precondition and user-decision failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(_)
                | SyncError::Local(_)
                | SyncError::Crypto(_)
                | SyncError::UploadRejected { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

pub use conflict::{ConflictCoordinator, ConflictDialog, DownloadResolution, UploadResolution};
pub use crypto::CryptoProvider;
pub use engine::SyncService;
pub use execute::FileTransfer;
pub use local::{FileSystem, LocalFileSystem};
pub use planner::{LocalChanges, ReconciliationPlanner, SyncPlan};
pub use remote::{HttpRemoteSyncApi, RemoteSyncApi};
pub use storage::MetadataStore;
