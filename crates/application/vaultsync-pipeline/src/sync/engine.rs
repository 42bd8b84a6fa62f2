use camino::Utf8Path;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use vaultsync_core::{
    DownloadTarget, FileNode, LocalFileRecord, OperationOutcome, OperationPayload,
    QueuedOperation, SyncActionKind, SyncProgress,
};

use crate::scheduler::{OperationHandle, OperationScheduler, QueueStatus};
use crate::sync::conflict::{ConflictCoordinator, ConflictDialog};
use crate::sync::crypto::CryptoProvider;
use crate::sync::execute::FileTransfer;
use crate::sync::local::FileSystem;
use crate::sync::planner::{LocalChanges, ReconciliationPlanner, SyncPlan};
use crate::sync::remote::RemoteSyncApi;
use crate::sync::storage::MetadataStore;
use crate::sync::{SyncError, SyncOptions};
use crate::tracker::ProgressCallback;

/// Per-vault sync entry point: plans, queues and awaits every transfer of a
/// pass and reports progress along the way.
///
/// Each instance owns its queue, workers and metadata locks; nothing is shared
/// between instances.
pub struct SyncService {
    planner: ReconciliationPlanner,
    transfer: Arc<FileTransfer>,
    scheduler: OperationScheduler,
    options: SyncOptions,
}

impl SyncService {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        fs: Arc<dyn FileSystem>,
        crypto: Arc<dyn CryptoProvider>,
        dialog: Arc<dyn ConflictDialog>,
        options: SyncOptions,
    ) -> Self {
        let metadata = Arc::new(MetadataStore::new(
            fs.clone(),
            options.metadata_file_name.clone(),
        ));
        let planner = ReconciliationPlanner::new(remote.clone(), fs.clone(), metadata.clone());
        let conflicts = ConflictCoordinator::new(remote.clone(), crypto.clone(), dialog);
        let transfer = Arc::new(FileTransfer::new(remote, fs, crypto, metadata, conflicts));
        let scheduler = OperationScheduler::new(transfer.clone(), options.concurrency());
        Self {
            planner,
            transfer,
            scheduler,
            options,
        }
    }

    /// Reconcile the vault with the server.
    ///
    /// Individual file failures are counted in the returned progress; only a
    /// failed planning step fails the pass.
    pub async fn perform_background_sync(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        tree: &[FileNode],
        on_progress: Option<ProgressCallback>,
    ) -> Result<SyncProgress, SyncError> {
        self.scheduler.clear(vault_id);
        if let Some(callback) = on_progress {
            self.scheduler.subscribe(vault_id, callback);
        }

        let plan = match self.planner.check_sync(vault_id, vault_path, tree).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(vault_id, "Sync planning failed: {}", e);
                self.scheduler.mark_error(vault_id);
                return Err(e);
            }
        };

        let payloads = self.payloads(&plan);
        let pass = self.scheduler.begin_pass(vault_id, payloads.len() as u64);
        if payloads.is_empty() {
            info!(vault_id, "Vault already in sync");
            return Ok(self.current_progress(vault_id));
        }

        info!(vault_id, operations = payloads.len(), "Starting sync pass");
        let handles: Vec<OperationHandle> = payloads
            .into_iter()
            .map(|payload| {
                let priority = match payload {
                    OperationPayload::Upload(_) => self.options.upload_priority,
                    OperationPayload::Download(_) => self.options.download_priority,
                };
                self.scheduler.enqueue(QueuedOperation::new(
                    vault_id,
                    vault_path,
                    payload,
                    priority,
                    self.options.max_retries,
                ))
            })
            .collect();

        let results = join_all(handles.into_iter().map(OperationHandle::wait)).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        self.scheduler.finish_pass(vault_id, pass);

        let progress = self.current_progress(vault_id);
        if failed > 0 {
            warn!(vault_id, failed, "Sync pass finished with failures");
        } else {
            info!(vault_id, completed = progress.completed, "Sync pass finished");
        }
        Ok(progress)
    }

    fn payloads(&self, plan: &SyncPlan) -> Vec<OperationPayload> {
        let records: HashMap<&str, &LocalFileRecord> = plan
            .local_files
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect();

        plan.pending()
            .filter_map(|action| match action.kind {
                SyncActionKind::Upload => match records.get(action.relative_path.as_str()) {
                    Some(record) => Some(OperationPayload::Upload((*record).clone())),
                    None => {
                        warn!(path = %action.relative_path, "Upload planned for a file not on disk, skipping");
                        None
                    }
                },
                SyncActionKind::Download => Some(OperationPayload::Download(DownloadTarget {
                    file_id: action.file_id.clone(),
                    relative_path: action.relative_path.clone(),
                    version: action.server_version,
                })),
                SyncActionKind::None => None,
            })
            .collect()
    }

    fn current_progress(&self, vault_id: &str) -> SyncProgress {
        self.scheduler.progress(vault_id).unwrap_or_default()
    }

    pub async fn check_sync(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        tree: &[FileNode],
    ) -> Result<SyncPlan, SyncError> {
        self.planner.check_sync(vault_id, vault_path, tree).await
    }

    pub async fn local_changes(
        &self,
        vault_path: &Utf8Path,
        tree: &[FileNode],
    ) -> Result<LocalChanges, SyncError> {
        self.planner.local_changes(vault_path, tree).await
    }

    /// Upload one file right away, outside the queue and without retries.
    pub async fn upload_file(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        file: &LocalFileRecord,
    ) -> Result<OperationOutcome, SyncError> {
        self.transfer.upload_file(vault_id, vault_path, file).await
    }

    /// Download one file right away, outside the queue and without retries.
    pub async fn download_file(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        target: &DownloadTarget,
    ) -> Result<OperationOutcome, SyncError> {
        self.transfer.download_file(vault_id, vault_path, target).await
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.scheduler.status()
    }

    pub fn on_sync_progress(&self, vault_id: &str, callback: ProgressCallback) {
        self.scheduler.subscribe(vault_id, callback);
    }

    pub fn off_sync_progress(&self, vault_id: &str) {
        self.scheduler.unsubscribe(vault_id);
    }

    pub fn sync_progress(&self, vault_id: &str) -> Option<SyncProgress> {
        self.scheduler.progress(vault_id)
    }

    /// Forget the vault: queued work, listener and counters.
    pub fn clear_sync_progress(&self, vault_id: &str) {
        self.scheduler.forget(vault_id);
    }

    /// Stop the workers. Queued operations, and any enqueued later, resolve
    /// as cancelled, so a pass in flight returns once its running transfers
    /// finish.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
