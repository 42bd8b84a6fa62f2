//! Central configuration constants for runtime limits and defaults.

/// Maximum number of upload/download operations running at once, across all vaults.
pub const MAX_CONCURRENT_OPERATIONS: usize = 5;

/// Minimum allowed concurrency.
pub const MIN_CONCURRENT_OPERATIONS: usize = 1;

/// Upper bound accepted for a configured concurrency.
pub const MAX_CONFIGURABLE_OPERATIONS: usize = 16;

/// Retries after the first failed attempt before an operation is abandoned.
pub const MAX_RETRIES: u32 = 3;

/// Default queue priority for uploads. Uploads run ahead of downloads so local
/// edits reach the server first.
pub const UPLOAD_PRIORITY: u32 = 2;

/// Default queue priority for downloads.
pub const DOWNLOAD_PRIORITY: u32 = 1;

/// Hidden side-file at the vault root holding per-path sync metadata.
pub const METADATA_FILE_NAME: &str = ".sync-metadata.json";

/// Convenience function to clamp a concurrency value into allowed range.
pub fn clamp_concurrency(v: usize) -> usize {
    v.clamp(MIN_CONCURRENT_OPERATIONS, MAX_CONFIGURABLE_OPERATIONS)
}
