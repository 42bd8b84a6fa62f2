use std::sync::Arc;
use tracing::{info, warn};
use vaultsync_core::formats::{EncryptedPayload, UploadRequest, UploadResponse};
use vaultsync_core::{ConflictDetail, ConflictInfo, ConflictResolution, ConflictType, ContentHash};
use vaultsync_infra::hashing::fingerprint;

use crate::sync::crypto::CryptoProvider;
use crate::sync::remote::RemoteSyncApi;
use crate::sync::SyncError;

/// Presents a conflict to a human and waits for their decision.
///
/// A dismissed dialog must return [`SyncError::ConflictDismissed`]; the
/// operation is then failed rather than silently skipped. Implementations may
/// queue several conflicts for sequential review, but each call resolves once.
#[async_trait::async_trait]
pub trait ConflictDialog: Send + Sync {
    async fn present(
        &self,
        conflict: &ConflictInfo,
        server_content: &str,
    ) -> Result<ConflictResolution, SyncError>;
}

/// How an upload conflict ended. The caller records `response.version` and
/// `content_hash` in the sync metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResolution {
    pub choice: ConflictResolution,
    pub response: UploadResponse,
    /// Content that is now authoritative for the path.
    pub content: String,
    pub content_hash: ContentHash,
    /// The local file no longer holds `content` and must be rewritten.
    pub write_local: bool,
}

/// How a download conflict ended. The caller writes `content` locally and,
/// when `should_upload` is set, pushes `upload_request` back to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResolution {
    pub choice: ConflictResolution,
    pub content: String,
    pub encrypted_content: String,
    pub should_upload: bool,
    pub upload_request: Option<UploadRequest>,
}

pub struct ConflictCoordinator {
    remote: Arc<dyn RemoteSyncApi>,
    crypto: Arc<dyn CryptoProvider>,
    dialog: Arc<dyn ConflictDialog>,
}

impl ConflictCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        crypto: Arc<dyn CryptoProvider>,
        dialog: Arc<dyn ConflictDialog>,
    ) -> Self {
        Self {
            remote,
            crypto,
            dialog,
        }
    }

    /// The server rejected `request` because its version moved on. Fetch the
    /// server copy, ask the human, and carry out their choice.
    pub async fn handle_upload_conflict(
        &self,
        vault_id: &str,
        request: &UploadRequest,
        local: &EncryptedPayload,
        detail: &ConflictDetail,
    ) -> Result<UploadResolution, SyncError> {
        let path = request.relative_path.as_str();
        let server_version = detail.current_server_version;
        warn!(
            vault_id,
            path,
            attempted = detail.attempted_version,
            server_version,
            "Upload conflict"
        );

        let server = self
            .remote
            .download_file_by_path(vault_id, path, Some(server_version))
            .await?;
        let local_content = self
            .crypto
            .decrypt_downloaded(&local.encrypted_content, &request.encrypted_file_key)
            .await?;
        let server_content = self
            .crypto
            .decrypt_downloaded(&server.encrypted_content, &server.encrypted_file_key)
            .await?;

        let info = ConflictInfo {
            relative_path: path.to_string(),
            local_version: detail.attempted_version,
            server_version,
            local_content: local_content.clone(),
            server_content: server_content.clone(),
            detail: detail.clone(),
            conflict_type: ConflictType::Upload,
        };
        let choice = self.dialog.present(&info, &server_content).await?;
        info!(vault_id, path, ?choice, "Upload conflict resolved");

        match &choice {
            ConflictResolution::KeepLocal => {
                let forced = UploadRequest {
                    version: server_version + 1,
                    force: true,
                    ..request.clone()
                };
                let response = self.force_upload(vault_id, &forced, &local.encrypted_content).await?;
                Ok(UploadResolution {
                    choice,
                    response,
                    content: local_content,
                    content_hash: request.content_hash.clone(),
                    write_local: false,
                })
            }
            ConflictResolution::UseServer => Ok(UploadResolution {
                choice,
                response: UploadResponse {
                    file_id: None,
                    version: server_version,
                    success: true,
                    conflict: None,
                },
                content_hash: fingerprint(&server_content),
                content: server_content,
                write_local: true,
            }),
            ConflictResolution::Merge { merged_content } => {
                let merged = merged_content.clone();
                let (forced, payload) = self.merged_request(path, &merged, server_version).await?;
                let response = self
                    .force_upload(vault_id, &forced, &payload.encrypted_content)
                    .await?;
                Ok(UploadResolution {
                    choice,
                    response,
                    content_hash: forced.content_hash,
                    content: merged,
                    write_local: true,
                })
            }
        }
    }

    /// The local file changed since its last sync while the server also has a
    /// newer version. Fetch the server copy and ask the human which one wins.
    pub async fn handle_download_conflict(
        &self,
        vault_id: &str,
        file_id: Option<&str>,
        relative_path: &str,
        server_version: u64,
        local_content: &str,
        local_version: u64,
    ) -> Result<DownloadResolution, SyncError> {
        warn!(vault_id, path = relative_path, local_version, server_version, "Local conflict on download");

        let server = match file_id {
            Some(id) => {
                self.remote
                    .download_file(vault_id, id, Some(server_version))
                    .await?
            }
            None => {
                self.remote
                    .download_file_by_path(vault_id, relative_path, Some(server_version))
                    .await?
            }
        };
        let server_content = self
            .crypto
            .decrypt_downloaded(&server.encrypted_content, &server.encrypted_file_key)
            .await?;

        let info = ConflictInfo {
            relative_path: relative_path.to_string(),
            local_version,
            server_version,
            local_content: local_content.to_string(),
            server_content: server_content.clone(),
            detail: ConflictDetail {
                current_server_version: server_version,
                attempted_version: local_version,
                current_server_hash: Some(server.content_hash.clone()),
                message: "File changed locally since the last sync".into(),
            },
            conflict_type: ConflictType::Download,
        };
        let choice = self.dialog.present(&info, &server_content).await?;
        info!(vault_id, path = relative_path, ?choice, "Download conflict resolved");

        match &choice {
            ConflictResolution::KeepLocal => {
                let (request, payload) = self
                    .merged_request(relative_path, local_content, server_version)
                    .await?;
                Ok(DownloadResolution {
                    choice,
                    content: local_content.to_string(),
                    encrypted_content: payload.encrypted_content,
                    should_upload: true,
                    upload_request: Some(request),
                })
            }
            ConflictResolution::UseServer => Ok(DownloadResolution {
                choice,
                content: server_content,
                encrypted_content: server.encrypted_content,
                should_upload: false,
                upload_request: None,
            }),
            ConflictResolution::Merge { merged_content } => {
                let merged = merged_content.clone();
                let (request, payload) = self
                    .merged_request(relative_path, &merged, server_version)
                    .await?;
                Ok(DownloadResolution {
                    choice,
                    content: merged,
                    encrypted_content: payload.encrypted_content,
                    should_upload: true,
                    upload_request: Some(request),
                })
            }
        }
    }

    /// Encrypt `content` and build the forced upload that lands it on top of
    /// `server_version`.
    async fn merged_request(
        &self,
        relative_path: &str,
        content: &str,
        server_version: u64,
    ) -> Result<(UploadRequest, EncryptedPayload), SyncError> {
        let payload = self.crypto.encrypt_for_upload(content).await?;
        let request = UploadRequest {
            relative_path: relative_path.to_string(),
            version: server_version + 1,
            size_bytes: content.len() as u64,
            content_hash: fingerprint(content),
            encrypted_file_key: payload.encrypted_file_key.clone(),
            force: true,
        };
        Ok((request, payload))
    }

    async fn force_upload(
        &self,
        vault_id: &str,
        request: &UploadRequest,
        encrypted_content: &str,
    ) -> Result<UploadResponse, SyncError> {
        let response = self
            .remote
            .force_upload_file(vault_id, request, encrypted_content)
            .await?;
        if !response.success {
            return Err(SyncError::UploadRejected {
                path: request.relative_path.clone(),
                message: "forced upload after conflict was not accepted".into(),
            });
        }
        Ok(response)
    }
}
