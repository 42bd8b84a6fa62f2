#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vaultsync_core::formats::{
    CheckRequest, CheckResponse, DownloadResponse, EncryptedPayload, RemoteAction,
    RemoteActionKind, UploadRequest, UploadResponse,
};
use vaultsync_core::{ConflictDetail, ConflictInfo, ConflictResolution, FileTree, SyncMetadata};
use vaultsync_infra::fingerprint;
use vaultsync_pipeline::{
    ConflictDialog, CryptoProvider, LocalFileSystem, RemoteSyncApi, SyncError, SyncOptions,
    SyncService,
};
use vaultsync_scanner::Scanner;

pub const FILE_KEY: &str = "k1";

/// Stand-in cipher: reversed text under a fixed file key.
pub fn seal(content: &str) -> String {
    content.chars().rev().collect()
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub content_hash: String,
    pub encrypted_content: String,
    pub encrypted_file_key: String,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: String,
    pub history: Vec<Revision>,
}

impl StoredFile {
    pub fn version(&self) -> u64 {
        self.history.len() as u64
    }

    fn latest(&self) -> &Revision {
        &self.history[self.history.len() - 1]
    }
}

/// In-memory versioned store with optimistic concurrency on upload.
#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<BTreeMap<String, StoredFile>>,
    pub uploads: Mutex<Vec<UploadRequest>>,
    pub upload_attempts: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub fail_check: AtomicBool,
    failing_uploads: Mutex<HashMap<String, u32>>,
    upload_delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Another device pushes `content` as the next version of `path`.
    pub fn push_from_other_device(&self, path: &str, content: &str) -> u64 {
        let mut files = self.files.lock().unwrap();
        let count = files.len();
        let file = files.entry(path.to_string()).or_insert_with(|| StoredFile {
            file_id: format!("f-{count}"),
            history: Vec::new(),
        });
        file.history.push(Revision {
            content_hash: fingerprint(content),
            encrypted_content: seal(content),
            encrypted_file_key: FILE_KEY.into(),
        });
        file.version()
    }

    pub fn file(&self, path: &str) -> Option<StoredFile> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// Plaintext of the latest version.
    pub fn content(&self, path: &str) -> Option<String> {
        self.file(path).map(|f| seal(&f.latest().encrypted_content))
    }

    pub fn fail_next_uploads(&self, path: &str, times: u32) {
        self.failing_uploads
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
    }

    pub fn slow_uploads(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = Some(delay);
    }

    pub fn accepted_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn revision(
        &self,
        file: &StoredFile,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError> {
        let v = version.unwrap_or(file.version());
        let rev = v
            .checked_sub(1)
            .and_then(|i| file.history.get(i as usize))
            .ok_or_else(|| SyncError::Remote(format!("404 version {v}")))?;
        Ok(DownloadResponse {
            version: v,
            encrypted_content: rev.encrypted_content.clone(),
            encrypted_file_key: rev.encrypted_file_key.clone(),
            content_hash: rev.content_hash.clone(),
        })
    }
}

#[async_trait::async_trait]
impl RemoteSyncApi for FakeRemote {
    async fn check_sync(&self, _vault_id: &str, req: &CheckRequest) -> Result<CheckResponse, SyncError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(SyncError::Remote("503 check unavailable".into()));
        }
        let files = self.files.lock().unwrap();
        let mut actions = Vec::new();

        for local in &req.files {
            let Some(server) = files.get(&local.relative_path) else {
                actions.push(RemoteAction {
                    relative_path: local.relative_path.clone(),
                    action: RemoteActionKind::Upload,
                    server_version: 0,
                    file_id: None,
                });
                continue;
            };
            let current = server.version();
            let action = if server.latest().content_hash == local.content_hash {
                RemoteActionKind::None
            } else if local.version >= current {
                RemoteActionKind::Upload
            } else {
                let base = &server.history[(local.version.max(1) - 1) as usize];
                if base.content_hash == local.content_hash {
                    RemoteActionKind::Download
                } else {
                    RemoteActionKind::Conflict
                }
            };
            actions.push(RemoteAction {
                relative_path: local.relative_path.clone(),
                action,
                server_version: current,
                file_id: Some(server.file_id.clone()),
            });
        }

        for (path, server) in files.iter() {
            if !req.files.iter().any(|f| &f.relative_path == path) {
                actions.push(RemoteAction {
                    relative_path: path.clone(),
                    action: RemoteActionKind::Download,
                    server_version: server.version(),
                    file_id: Some(server.file_id.clone()),
                });
            }
        }

        Ok(CheckResponse { actions })
    }

    async fn upload_file(
        &self,
        _vault_id: &str,
        req: &UploadRequest,
        encrypted_content: &str,
    ) -> Result<UploadResponse, SyncError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut failing = self.failing_uploads.lock().unwrap();
            if let Some(left) = failing.get_mut(&req.relative_path) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SyncError::Remote("503 upload unavailable".into()));
                }
            }
        }

        let mut files = self.files.lock().unwrap();
        let count = files.len();
        let file = files
            .entry(req.relative_path.clone())
            .or_insert_with(|| StoredFile {
                file_id: format!("f-{count}"),
                history: Vec::new(),
            });
        let current = file.version();

        if !req.force && req.version != current + 1 {
            return Ok(UploadResponse {
                file_id: Some(file.file_id.clone()),
                version: current,
                success: false,
                conflict: Some(ConflictDetail {
                    current_server_version: current,
                    attempted_version: req.version,
                    current_server_hash: Some(file.latest().content_hash.clone()),
                    message: "version mismatch".into(),
                }),
            });
        }

        file.history.push(Revision {
            content_hash: req.content_hash.clone(),
            encrypted_content: encrypted_content.to_string(),
            encrypted_file_key: req.encrypted_file_key.clone(),
        });
        let version = file.version();
        let file_id = file.file_id.clone();
        drop(files);
        self.uploads.lock().unwrap().push(req.clone());

        Ok(UploadResponse {
            file_id: Some(file_id),
            version,
            success: true,
            conflict: None,
        })
    }

    async fn download_file(
        &self,
        _vault_id: &str,
        file_id: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError> {
        let files = self.files.lock().unwrap();
        let file = files
            .values()
            .find(|f| f.file_id == file_id)
            .ok_or_else(|| SyncError::Remote(format!("404 {file_id}")))?;
        self.revision(file, version)
    }

    async fn download_file_by_path(
        &self,
        _vault_id: &str,
        relative_path: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError> {
        let files = self.files.lock().unwrap();
        let file = files
            .get(relative_path)
            .ok_or_else(|| SyncError::Remote(format!("404 {relative_path}")))?;
        self.revision(file, version)
    }
}

pub struct FakeCrypto {
    pub unlocked: AtomicBool,
    pub encryptions: AtomicUsize,
}

impl FakeCrypto {
    pub fn unlocked() -> Arc<Self> {
        Arc::new(Self {
            unlocked: AtomicBool::new(true),
            encryptions: AtomicUsize::new(0),
        })
    }

    pub fn locked() -> Arc<Self> {
        let crypto = Self::unlocked();
        crypto.unlocked.store(false, Ordering::SeqCst);
        crypto
    }
}

#[async_trait::async_trait]
impl CryptoProvider for FakeCrypto {
    fn has_active_key(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    async fn encrypt_for_upload(&self, content: &str) -> Result<EncryptedPayload, SyncError> {
        if !self.has_active_key() {
            return Err(SyncError::EncryptionUnavailable);
        }
        self.encryptions.fetch_add(1, Ordering::SeqCst);
        Ok(EncryptedPayload {
            encrypted_content: seal(content),
            encrypted_file_key: FILE_KEY.into(),
        })
    }

    async fn decrypt_downloaded(
        &self,
        encrypted_content: &str,
        encrypted_file_key: &str,
    ) -> Result<String, SyncError> {
        if encrypted_file_key != FILE_KEY {
            return Err(SyncError::Crypto(format!("unknown file key {encrypted_file_key}")));
        }
        Ok(seal(encrypted_content))
    }
}

/// Answers every conflict with the same choice, or dismisses it when none is set.
#[derive(Default)]
pub struct ScriptedDialog {
    choice: Option<ConflictResolution>,
    pub presented: Mutex<Vec<(ConflictInfo, String)>>,
}

impl ScriptedDialog {
    pub fn answering(choice: ConflictResolution) -> Arc<Self> {
        Arc::new(Self {
            choice: Some(choice),
            presented: Mutex::new(Vec::new()),
        })
    }

    pub fn dismissing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.presented.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ConflictDialog for ScriptedDialog {
    async fn present(
        &self,
        conflict: &ConflictInfo,
        server_content: &str,
    ) -> Result<ConflictResolution, SyncError> {
        self.presented
            .lock()
            .unwrap()
            .push((conflict.clone(), server_content.to_string()));
        self.choice
            .clone()
            .ok_or_else(|| SyncError::ConflictDismissed(conflict.relative_path.clone()))
    }
}

pub struct Vault {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

impl Vault {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.join(rel)).unwrap()
    }

    pub fn path(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tree(&self) -> FileTree {
        Scanner::scan_tree(&self.root).unwrap()
    }

    pub fn metadata(&self) -> SyncMetadata {
        let raw = std::fs::read_to_string(self.root.join(".sync-metadata.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

pub fn service(
    remote: Arc<FakeRemote>,
    crypto: Arc<FakeCrypto>,
    dialog: Arc<ScriptedDialog>,
) -> SyncService {
    SyncService::new(
        remote,
        Arc::new(LocalFileSystem::new()),
        crypto,
        dialog,
        SyncOptions::default(),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
