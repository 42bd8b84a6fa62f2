use md5::Context;
use vaultsync_core::ContentHash;

/// Deterministic fingerprint of note text, used only to detect that content
/// changed since the last sync. Path and mtime never feed into it.
/// Not an integrity check.
pub fn fingerprint(content: &str) -> ContentHash {
    let mut hasher = Context::new();
    hasher.consume(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `true` when `content` still matches a previously recorded fingerprint.
pub fn matches(content: &str, recorded: &str) -> bool {
    fingerprint(content).eq_ignore_ascii_case(recorded)
}
