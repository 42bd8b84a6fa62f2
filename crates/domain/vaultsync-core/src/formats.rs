//! Request and response shapes exchanged with the remote sync API.

use crate::{ConflictDetail, ContentHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFile {
    pub relative_path: String,
    pub version: u64,
    pub content_hash: ContentHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub files: Vec<CheckFile>,
}

/// Authoritative per-path verdict returned by the check endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteActionKind {
    None,
    Upload,
    Download,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAction {
    pub relative_path: String,
    pub action: RemoteActionKind,
    pub server_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub actions: Vec<RemoteAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub relative_path: String,
    pub version: u64,
    pub size_bytes: u64,
    pub content_hash: ContentHash,
    pub encrypted_file_key: String,
    /// Bypasses the optimistic-concurrency check on the server.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub file_id: Option<String>,
    pub version: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub version: u64,
    pub encrypted_content: String,
    pub encrypted_file_key: String,
    pub content_hash: ContentHash,
}

/// Output of the crypto collaborator's encrypt-for-upload step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub encrypted_content: String,
    pub encrypted_file_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_response_accepts_conflict_without_file_id() {
        let resp: CheckResponse = serde_json::from_str(
            r#"{"actions":[{"relativePath":"notes/a.md","action":"conflict","serverVersion":3}]}"#,
        )
        .unwrap();
        assert_eq!(resp.actions[0].action, RemoteActionKind::Conflict);
        assert_eq!(resp.actions[0].server_version, 3);
        assert!(resp.actions[0].file_id.is_none());
    }

    #[test]
    fn upload_response_carries_conflict_detail() {
        let resp: UploadResponse = serde_json::from_str(
            r#"{"version":3,"success":false,"conflict":{"currentServerVersion":3,"attemptedVersion":3,"currentServerHash":"h","message":"stale"}}"#,
        )
        .unwrap();
        let conflict = resp.conflict.unwrap();
        assert_eq!(conflict.current_server_version, 3);
        assert_eq!(conflict.current_server_hash.as_deref(), Some("h"));
        assert!(resp.file_id.is_none());
    }
}
