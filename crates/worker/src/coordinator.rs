//! HTTP client for the coordination server.
//!
//! Every call is a single request with a JSON body; nothing is retried.

use std::path::Path;

use serde::{Deserialize, Serialize};

use forge_core::error::CoreError;
use forge_core::job::{JobPoll, PollResponse};

/// Error type for coordination-server calls.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Coordination server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response body was not the expected JSON.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Writing a downloaded file failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Body of `POST /receive_files_image`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUpload {
    pub nomor: String,
    #[serde(rename = "WORKER_ID")]
    pub worker_id: String,
    pub job_id: String,
    pub filename: String,
    #[serde(rename = "IMAGE_BASE64")]
    pub image_base64: String,
}

/// Body of `POST /receive_files_image_hd`. Images are zlib-compressed
/// before base64 encoding.
#[derive(Debug, Clone, Serialize)]
pub struct ImagePairUpload {
    #[serde(rename = "WORKER_ID")]
    pub worker_id: String,
    pub job_id: String,
    pub filename: String,
    #[serde(rename = "IMAGE_SD_BASE64")]
    pub sd_base64: String,
    #[serde(rename = "IMAGE_HD_BASE64")]
    pub hd_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateTypeResponse {
    #[serde(default)]
    is_upscale: bool,
}

/// Client for one coordination server, bound to this worker's identity.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: reqwest::Client,
    base_url: String,
    worker_id: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Ask which pipeline to run: `true` selects the high-resolution one.
    pub async fn generate_type(&self) -> Result<bool, CoordinatorError> {
        let response = self
            .client
            .post(self.url("generate_type"))
            .json(&serde_json::json!({ "is_upscale": false }))
            .send()
            .await?;
        let body: GenerateTypeResponse = Self::parse_response(response).await?;
        Ok(body.is_upscale)
    }

    /// Download the workflow template to `dest`.
    pub async fn fetch_workflow(&self, dest: &Path) -> Result<(), CoordinatorError> {
        let response = self.client.get(self.url("get_workflow")).send().await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        std::fs::write(dest, &bytes).map_err(|e| CoreError::io(dest, e))?;
        tracing::info!(path = %dest.display(), bytes = bytes.len(), "Workflow template downloaded");
        Ok(())
    }

    /// Request the next job for this worker.
    pub async fn poll_job(&self) -> Result<JobPoll, CoordinatorError> {
        let response = self
            .client
            .post(self.url("get_job"))
            .json(&serde_json::json!({ "WORKER_ID": self.worker_id }))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        let poll: PollResponse = serde_json::from_str(&text)?;
        Ok(poll.into_poll())
    }

    pub async fn upload_image(&self, upload: &ImageUpload) -> Result<(), CoordinatorError> {
        self.post_upload("receive_files_image", upload).await
    }

    pub async fn upload_image_pair(&self, upload: &ImagePairUpload) -> Result<(), CoordinatorError> {
        self.post_upload("receive_files_image_hd", upload).await
    }

    // ---- private helpers ----

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    /// Uploads count as delivered only on exactly HTTP 200.
    async fn post_upload<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<(), CoordinatorError> {
        let response = self.client.post(self.url(endpoint)).json(body).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CoordinatorError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, CoordinatorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CoordinatorError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CoordinatorError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
