use std::path::Path;
use std::time::Duration;

const RENAME_ATTEMPTS: u32 = 6;
const RENAME_BACKOFF_CAP: Duration = Duration::from_millis(1000);

/// Rename with a short exponential backoff. Editors and file indexers briefly
/// hold notes open on some platforms, which makes a single rename flaky.
pub async fn robust_rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> std::io::Result<()> {
    let mut attempt = 0u32;
    let mut backoff = Duration::from_millis(25);

    loop {
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= RENAME_ATTEMPTS {
                    return Err(e);
                }
                tracing::debug!(attempt, error = %e, "rename failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, RENAME_BACKOFF_CAP);
            }
        }
    }
}
