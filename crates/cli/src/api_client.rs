use anyhow::{Context, Result};
use depot_core::session::{
    AcceptSegmentResponse, DeleteFileResponse, DirectUploadResponse, FileEntry, FinalizeResponse,
    ListFilesResponse, SessionStatusResponse,
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        let url = self.url("/v1/files")?;
        let response: ListFilesResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.files)
    }

    pub async fn direct_upload(&self, filename: &str, data: Vec<u8>) -> Result<DirectUploadResponse> {
        let mut url = self.url("/v1/files")?;
        url.query_pairs_mut().append_pair("filename", filename);
        self.send_json(self.http.post(url).body(data)).await
    }

    pub async fn delete_file(&self, file_id: i64) -> Result<DeleteFileResponse> {
        let url = self.url(&format!("/v1/files/{file_id}"))?;
        self.send_json(self.http.delete(url)).await
    }

    /// Fetch a file's reassembled content as a byte stream.
    pub async fn download(&self, file_id: i64) -> Result<reqwest::Response> {
        let url = self.url(&format!("/v1/files/{file_id}/content"))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(response)
    }

    /// Session status, or None when the server holds no segments under
    /// the token (fresh or already finalized).
    pub async fn session_status(&self, token: &str) -> Result<Option<SessionStatusResponse>> {
        let url = self.url(&format!("/v1/uploads/{token}"))?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn put_segment(
        &self,
        token: &str,
        index: u32,
        filename: &str,
        total_size: u64,
        total_segments: u32,
        data: Vec<u8>,
    ) -> Result<AcceptSegmentResponse> {
        let mut url = self.url(&format!("/v1/uploads/{token}/segments/{index}"))?;
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("total_size", &total_size.to_string())
            .append_pair("total_segments", &total_segments.to_string());
        self.send_json(self.http.put(url).body(data)).await
    }

    pub async fn finalize_session(&self, token: &str) -> Result<FinalizeResponse> {
        let url = self.url(&format!("/v1/uploads/{token}/finalize"))?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn abort_session(&self, token: &str) -> Result<()> {
        let url = self.url(&format!("/v1/uploads/{token}"))?;
        let response = self.http.delete(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(())
    }
}
