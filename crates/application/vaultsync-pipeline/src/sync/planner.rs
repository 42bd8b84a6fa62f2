use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use vaultsync_core::formats::{CheckFile, CheckRequest, RemoteAction, RemoteActionKind};
use vaultsync_core::path_utils::VaultPath;
use vaultsync_core::tree::flatten_files;
use vaultsync_core::{
    ConflictInfo, FileNode, LocalFileRecord, SyncAction, SyncActionKind, SyncMetadata,
};
use vaultsync_infra::hashing::fingerprint;

use crate::sync::local::FileSystem;
use crate::sync::remote::RemoteSyncApi;
use crate::sync::storage::MetadataStore;
use crate::sync::SyncError;

/// Output of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    /// Always empty: conflicts surface while executing uploads and downloads.
    pub conflicts: Vec<ConflictInfo>,
    /// The local records the plan was computed from.
    pub local_files: Vec<LocalFileRecord>,
}

impl SyncPlan {
    /// Actions that need an upload or download.
    pub fn pending(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions
            .iter()
            .filter(|a| a.kind != SyncActionKind::None)
    }

    pub fn is_in_sync(&self) -> bool {
        self.pending().next().is_none()
    }
}

/// Network-free comparison of the working tree against sync metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalChanges {
    /// On disk, never synced.
    pub added: Vec<String>,
    /// Fingerprint differs from the last synced one.
    pub modified: Vec<String>,
    /// Tracked in metadata but gone from disk.
    pub missing: Vec<String>,
}

impl LocalChanges {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.missing.is_empty()
    }
}

pub struct ReconciliationPlanner {
    remote: Arc<dyn RemoteSyncApi>,
    fs: Arc<dyn FileSystem>,
    metadata: Arc<MetadataStore>,
}

impl ReconciliationPlanner {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        fs: Arc<dyn FileSystem>,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            remote,
            fs,
            metadata,
        }
    }

    /// Diff local state against the remote store's view of `vault_id`.
    /// Transport errors propagate unchanged; nothing here is retried.
    pub async fn check_sync(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        tree: &[FileNode],
    ) -> Result<SyncPlan, SyncError> {
        let metadata = self.metadata.read(vault_path).await;
        let local_files =
            collect_local_files(&*self.fs, &metadata, self.metadata.file_name(), vault_path, tree)
                .await?;

        let request = CheckRequest {
            files: local_files
                .iter()
                .map(|f| CheckFile {
                    relative_path: f.relative_path.clone(),
                    version: f.version,
                    content_hash: f.content_hash.clone(),
                })
                .collect(),
        };

        info!(vault_id, files = request.files.len(), "Checking sync state");
        let response = self.remote.check_sync(vault_id, &request).await?;
        let actions = translate_actions(response.actions, &local_files);

        debug!(
            vault_id,
            pending = actions.iter().filter(|a| a.kind != SyncActionKind::None).count(),
            "Sync plan ready"
        );

        Ok(SyncPlan {
            actions,
            conflicts: Vec::new(),
            local_files,
        })
    }

    pub async fn local_changes(
        &self,
        vault_path: &Utf8Path,
        tree: &[FileNode],
    ) -> Result<LocalChanges, SyncError> {
        local_changes(&*self.fs, &self.metadata, vault_path, tree).await
    }
}

/// Read and fingerprint every markdown note in `tree`, attaching the last
/// synced version from `metadata` (1 when untracked).
pub async fn collect_local_files(
    fs: &dyn FileSystem,
    metadata: &SyncMetadata,
    metadata_file_name: &str,
    vault_path: &Utf8Path,
    tree: &[FileNode],
) -> Result<Vec<LocalFileRecord>, SyncError> {
    let mut records = Vec::new();

    for node in flatten_files(tree) {
        if node.name == metadata_file_name || !VaultPath::is_markdown(&node.path) {
            continue;
        }
        let Some(relative_path) = VaultPath::relative_to(vault_path, &node.path) else {
            debug!("Skipping {} outside vault {}", node.path, vault_path);
            continue;
        };

        let content = match fs.read_file(&node.path).await {
            Ok(c) => c,
            // Deleted between the tree walk and now.
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        let last_modified = fs.modified(&node.path).await.ok().flatten();
        let version = metadata.get(&relative_path).map_or(1, |e| e.version);

        records.push(LocalFileRecord {
            path: node.path.clone(),
            content_hash: fingerprint(&content),
            relative_path,
            content,
            version,
            last_modified,
        });
    }

    Ok(records)
}

/// Turn the server's verdicts into executable actions. `conflict` becomes an
/// `upload` carrying the server's version and file id: the upload is tried
/// first and the server re-reports the conflict if it still holds.
pub fn translate_actions(remote: Vec<RemoteAction>, local: &[LocalFileRecord]) -> Vec<SyncAction> {
    let by_path: HashMap<&str, &Utf8PathBuf> = local
        .iter()
        .map(|f| (f.relative_path.as_str(), &f.path))
        .collect();

    remote
        .into_iter()
        .map(|action| {
            let relative_path = VaultPath::normalize(&action.relative_path);
            let kind = match action.action {
                RemoteActionKind::None => SyncActionKind::None,
                RemoteActionKind::Upload | RemoteActionKind::Conflict => SyncActionKind::Upload,
                RemoteActionKind::Download => SyncActionKind::Download,
            };
            SyncAction {
                local_path: by_path.get(relative_path.as_str()).map(|p| (*p).clone()),
                relative_path,
                kind,
                server_version: action.server_version,
                file_id: action.file_id,
            }
        })
        .collect()
}

pub async fn local_changes(
    fs: &dyn FileSystem,
    metadata_store: &MetadataStore,
    vault_path: &Utf8Path,
    tree: &[FileNode],
) -> Result<LocalChanges, SyncError> {
    let metadata = metadata_store.peek(vault_path).await;
    let files = collect_local_files(fs, &metadata, metadata_store.file_name(), vault_path, tree).await?;

    let mut changes = LocalChanges::default();
    let mut present = BTreeSet::new();
    for file in &files {
        present.insert(file.relative_path.as_str());
        match metadata.get(&file.relative_path) {
            None => changes.added.push(file.relative_path.clone()),
            Some(entry) if !entry.hash.eq_ignore_ascii_case(&file.content_hash) => {
                changes.modified.push(file.relative_path.clone())
            }
            Some(_) => {}
        }
    }
    changes.missing = metadata
        .keys()
        .filter(|path| !present.contains(path.as_str()))
        .cloned()
        .collect();

    Ok(changes)
}
