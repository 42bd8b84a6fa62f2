use reqwest::Client;
use std::time::Duration;

/// Requests are bounded by this timeout; a hung call otherwise occupies one
/// scheduler slot until the transport gives up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_http_client() -> reqwest::Result<Client> {
    tracing::debug!(
        timeout_secs = DEFAULT_REQUEST_TIMEOUT.as_secs(),
        "building http client"
    );
    Client::builder()
        .user_agent(concat!("vaultsync/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .gzip(true)
        .build()
}
