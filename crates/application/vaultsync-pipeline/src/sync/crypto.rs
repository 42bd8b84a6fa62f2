use vaultsync_core::formats::EncryptedPayload;

use crate::sync::SyncError;

/// End-to-end encryption collaborator. Key derivation and the cipher itself
/// live behind this trait; the engine only decides when to call it.
#[async_trait::async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Whether a master key is unlocked for this session.
    fn has_active_key(&self) -> bool;

    /// Encrypt note text under a fresh file key, returning the ciphertext and
    /// the file key wrapped with the master key.
    async fn encrypt_for_upload(&self, content: &str) -> Result<EncryptedPayload, SyncError>;

    /// Unwrap `encrypted_file_key` with the master key and decrypt the content.
    async fn decrypt_downloaded(
        &self,
        encrypted_content: &str,
        encrypted_file_key: &str,
    ) -> Result<String, SyncError>;
}
