use crate::sync::SyncError;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use vaultsync_core::formats::{
    CheckRequest, CheckResponse, DownloadResponse, UploadRequest, UploadResponse,
};

/// The remote versioned store, seen through the operations sync needs.
#[async_trait::async_trait]
pub trait RemoteSyncApi: Send + Sync {
    async fn check_sync(&self, vault_id: &str, req: &CheckRequest) -> Result<CheckResponse, SyncError>;

    /// Optimistic upload: the server rejects it with a conflict when
    /// `req.version` does not follow its current version.
    async fn upload_file(
        &self,
        vault_id: &str,
        req: &UploadRequest,
        encrypted_content: &str,
    ) -> Result<UploadResponse, SyncError>;

    /// Upload that bypasses the version check. Only used after a conflict
    /// has been resolved.
    async fn force_upload_file(
        &self,
        vault_id: &str,
        req: &UploadRequest,
        encrypted_content: &str,
    ) -> Result<UploadResponse, SyncError> {
        let forced = UploadRequest {
            force: true,
            ..req.clone()
        };
        self.upload_file(vault_id, &forced, encrypted_content).await
    }

    async fn download_file(
        &self,
        vault_id: &str,
        file_id: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError>;

    async fn download_file_by_path(
        &self,
        vault_id: &str,
        relative_path: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody<'a> {
    #[serde(flatten)]
    request: &'a UploadRequest,
    encrypted_content: &'a str,
}

/// JSON-over-HTTP implementation of [`RemoteSyncApi`].
pub struct HttpRemoteSyncApi {
    client: Client,
    base: Url,
    token: Option<String>,
}

/// Normalize the server URL so relative endpoint joins keep its path prefix.
pub(crate) fn normalize_base(base_url: &str) -> Result<Url, SyncError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| SyncError::Remote(format!("invalid server url {base_url}: {e}")))?;

    // Without a trailing slash, `https://host/api` would lose `api` on join.
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

impl HttpRemoteSyncApi {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Result<Self, SyncError> {
        Ok(Self {
            client,
            base: normalize_base(base_url)?,
            token,
        })
    }

    fn endpoint(&self, vault_id: &str, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| SyncError::Remote("cannot mutate url segments".into()))?;
            segs.pop_if_empty();
            segs.push("vaults");
            segs.push(vault_id);
            segs.extend(segments);
        }
        Ok(url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T, SyncError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Remote(format!("{what} failed with {status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Remote(format!("{what} parse failed: {e}")))
    }

    async fn fetch_download(&self, url: Url, what: &str) -> Result<DownloadResponse, SyncError> {
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("{what} request failed: {e}")))?;
        Self::parse(resp, what).await
    }
}

#[async_trait::async_trait]
impl RemoteSyncApi for HttpRemoteSyncApi {
    async fn check_sync(&self, vault_id: &str, req: &CheckRequest) -> Result<CheckResponse, SyncError> {
        let url = self.endpoint(vault_id, &["sync", "check"])?;
        debug!(vault_id, files = req.files.len(), "POST {}", url);
        let resp = self
            .authorized(self.client.post(url))
            .json(req)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("check request failed: {e}")))?;
        Self::parse(resp, "check").await
    }

    async fn upload_file(
        &self,
        vault_id: &str,
        req: &UploadRequest,
        encrypted_content: &str,
    ) -> Result<UploadResponse, SyncError> {
        let url = self.endpoint(vault_id, &["files"])?;
        debug!(vault_id, path = %req.relative_path, version = req.version, force = req.force, "POST {}", url);
        let body = UploadBody {
            request: req,
            encrypted_content,
        };
        let resp = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("upload of {} failed: {e}", req.relative_path)))?;

        // A version conflict comes back as 409 with a regular upload body.
        if resp.status() == StatusCode::CONFLICT {
            return resp.json::<UploadResponse>().await.map_err(|e| {
                SyncError::Remote(format!("conflict body for {} unreadable: {e}", req.relative_path))
            });
        }
        Self::parse(resp, "upload").await
    }

    async fn download_file(
        &self,
        vault_id: &str,
        file_id: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError> {
        let mut url = self.endpoint(vault_id, &["files", file_id])?;
        if let Some(v) = version {
            url.query_pairs_mut().append_pair("version", &v.to_string());
        }
        self.fetch_download(url, "download").await
    }

    async fn download_file_by_path(
        &self,
        vault_id: &str,
        relative_path: &str,
        version: Option<u64>,
    ) -> Result<DownloadResponse, SyncError> {
        let mut url = self.endpoint(vault_id, &["files", "by-path"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("path", relative_path);
            if let Some(v) = version {
                query.append_pair("version", &v.to_string());
            }
        }
        self.fetch_download(url, "download by path").await
    }
}
