use camino::Utf8Path;
use std::sync::Arc;
use tracing::{debug, info};
use vaultsync_core::formats::UploadRequest;
use vaultsync_core::path_utils::VaultPath;
use vaultsync_core::{
    DownloadTarget, LocalFileRecord, OperationKind, OperationOutcome, OperationPayload,
    QueuedOperation,
};
use vaultsync_infra::hashing::{fingerprint, matches};

use crate::scheduler::OperationExecutor;
use crate::sync::conflict::ConflictCoordinator;
use crate::sync::crypto::CryptoProvider;
use crate::sync::local::FileSystem;
use crate::sync::remote::RemoteSyncApi;
use crate::sync::storage::MetadataStore;
use crate::sync::SyncError;

/// Executes single uploads and downloads and keeps the metadata store in step
/// with every successful transfer.
pub struct FileTransfer {
    remote: Arc<dyn RemoteSyncApi>,
    fs: Arc<dyn FileSystem>,
    crypto: Arc<dyn CryptoProvider>,
    metadata: Arc<MetadataStore>,
    conflicts: ConflictCoordinator,
}

impl FileTransfer {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        fs: Arc<dyn FileSystem>,
        crypto: Arc<dyn CryptoProvider>,
        metadata: Arc<MetadataStore>,
        conflicts: ConflictCoordinator,
    ) -> Self {
        Self {
            remote,
            fs,
            crypto,
            metadata,
            conflicts,
        }
    }

    pub async fn upload_file(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        file: &LocalFileRecord,
    ) -> Result<OperationOutcome, SyncError> {
        if !self.crypto.has_active_key() {
            return Err(SyncError::EncryptionUnavailable);
        }
        let path = file.relative_path.as_str();

        let encrypted = self.crypto.encrypt_for_upload(&file.content).await?;
        let metadata = self.metadata.read(vault_path).await;
        let version = metadata.get(path).map_or(1, |e| e.version + 1);

        let request = UploadRequest {
            relative_path: path.to_string(),
            version,
            size_bytes: file.content.len() as u64,
            content_hash: file.content_hash.clone(),
            encrypted_file_key: encrypted.encrypted_file_key.clone(),
            force: false,
        };
        debug!(vault_id, path, version, "Uploading");
        let response = self
            .remote
            .upload_file(vault_id, &request, &encrypted.encrypted_content)
            .await?;

        if response.success {
            self.metadata
                .record(vault_path, path, response.version, file.content_hash.clone())
                .await?;
            info!(vault_id, path, version = response.version, "Uploaded");
            return Ok(OperationOutcome {
                relative_path: path.to_string(),
                kind: OperationKind::Upload,
                version: response.version,
                content_hash: file.content_hash.clone(),
                resolved_conflict: false,
            });
        }

        let Some(detail) = response.conflict else {
            return Err(SyncError::UploadRejected {
                path: path.to_string(),
                message: format!("server refused version {version}"),
            });
        };

        let resolution = self
            .conflicts
            .handle_upload_conflict(vault_id, &request, &encrypted, &detail)
            .await?;
        if resolution.write_local {
            self.fs.write_file(&file.path, &resolution.content).await?;
        }
        self.metadata
            .record(
                vault_path,
                path,
                resolution.response.version,
                resolution.content_hash.clone(),
            )
            .await?;

        Ok(OperationOutcome {
            relative_path: path.to_string(),
            kind: OperationKind::Upload,
            version: resolution.response.version,
            content_hash: resolution.content_hash,
            resolved_conflict: true,
        })
    }

    pub async fn download_file(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        target: &DownloadTarget,
    ) -> Result<OperationOutcome, SyncError> {
        let path = VaultPath::normalize(&target.relative_path);
        if !VaultPath::verify_safe(&path) {
            return Err(SyncError::Security(format!(
                "download path escapes vault root: {}",
                target.relative_path
            )));
        }
        if !self.crypto.has_active_key() {
            return Err(SyncError::EncryptionUnavailable);
        }
        let local_path = vault_path.join(&path);

        // A local edit since the last sync must never be overwritten blindly,
        // even when the check phase did not see it.
        let metadata = self.metadata.read(vault_path).await;
        if let Some(entry) = metadata.get(&path) {
            let current = match self.fs.read_file(&local_path).await {
                Ok(content) => Some(content),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            if let Some(local_content) = current {
                if !matches(&local_content, &entry.hash) {
                    return self
                        .resolve_local_conflict(
                            vault_id,
                            vault_path,
                            target,
                            &path,
                            &local_content,
                            entry.version,
                        )
                        .await;
                }
            }
        }

        let response = match target.file_id.as_deref() {
            Some(id) => {
                self.remote
                    .download_file(vault_id, id, Some(target.version))
                    .await?
            }
            None => {
                self.remote
                    .download_file_by_path(vault_id, &path, Some(target.version))
                    .await?
            }
        };
        let content = self
            .crypto
            .decrypt_downloaded(&response.encrypted_content, &response.encrypted_file_key)
            .await?;

        self.write_note(&local_path, &content).await?;
        let hash = fingerprint(&content);
        self.metadata
            .record(vault_path, &path, response.version, hash.clone())
            .await?;
        info!(vault_id, path = %path, version = response.version, "Downloaded");

        Ok(OperationOutcome {
            relative_path: path,
            kind: OperationKind::Download,
            version: response.version,
            content_hash: hash,
            resolved_conflict: false,
        })
    }

    async fn resolve_local_conflict(
        &self,
        vault_id: &str,
        vault_path: &Utf8Path,
        target: &DownloadTarget,
        path: &str,
        local_content: &str,
        local_version: u64,
    ) -> Result<OperationOutcome, SyncError> {
        let resolution = self
            .conflicts
            .handle_download_conflict(
                vault_id,
                target.file_id.as_deref(),
                path,
                target.version,
                local_content,
                local_version,
            )
            .await?;

        let local_path = vault_path.join(path);
        if resolution.content != local_content {
            self.write_note(&local_path, &resolution.content).await?;
        }

        let (version, hash) = match (&resolution.upload_request, resolution.should_upload) {
            (Some(request), true) => {
                let response = self
                    .remote
                    .force_upload_file(vault_id, request, &resolution.encrypted_content)
                    .await?;
                if !response.success {
                    return Err(SyncError::UploadRejected {
                        path: path.to_string(),
                        message: "re-upload after local conflict was not accepted".into(),
                    });
                }
                (response.version, request.content_hash.clone())
            }
            _ => (target.version, fingerprint(&resolution.content)),
        };

        self.metadata
            .record(vault_path, path, version, hash.clone())
            .await?;

        Ok(OperationOutcome {
            relative_path: path.to_string(),
            kind: OperationKind::Download,
            version,
            content_hash: hash,
            resolved_conflict: true,
        })
    }

    async fn write_note(&self, local_path: &Utf8Path, content: &str) -> Result<(), SyncError> {
        if let Some(parent) = local_path.parent() {
            self.fs.ensure_dir(parent).await?;
        }
        self.fs.write_file(local_path, content).await
    }
}

#[async_trait::async_trait]
impl OperationExecutor for FileTransfer {
    async fn execute(&self, op: &QueuedOperation) -> Result<OperationOutcome, SyncError> {
        match &op.payload {
            OperationPayload::Upload(file) => {
                self.upload_file(&op.vault_id, &op.vault_path, file).await
            }
            OperationPayload::Download(target) => {
                self.download_file(&op.vault_id, &op.vault_path, target)
                    .await
            }
        }
    }
}
