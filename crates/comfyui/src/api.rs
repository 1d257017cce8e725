//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps prompt submission, history retrieval, image download and the
//! readiness probe using [`reqwest`]. Every request carries the optional
//! bearer token.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use forge_core::workflow::WorkflowDocument;

/// Per-request timeout of the readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// One prompt's entry in `/history/{prompt_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
}

/// Outputs recorded for one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// Absent for nodes that produced no images.
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
}

/// Location of a stored image, as passed to `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    /// * `token`   - Bearer token attached to every request when present.
    pub fn new(api_url: String, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, token: Option<String>) -> Self {
        Self {
            client,
            api_url,
            token,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the document and client ID. Returns the
    /// server-assigned `prompt_id` and queue position.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowDocument,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .authorized(self.client.post(format!("{}/prompt", self.api_url)))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// The response maps prompt IDs to entries; a prompt that has not
    /// finished (or is unknown) is simply absent from the map.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<IndexMap<String, HistoryEntry>, ComfyUIApiError> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/history/{}", self.api_url, prompt_id)),
            )
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of a stored image via `GET /view`.
    pub async fn view_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/view", self.api_url)))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder_type.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Probe `GET /prompt` once and return the HTTP status code.
    ///
    /// Any status is returned as-is; only transport failures are errors.
    pub async fn probe(&self) -> Result<u16, ComfyUIApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/prompt", self.api_url)))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }

    // ---- private helpers ----

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_entry_parses_mixed_outputs() {
        let json = r#"{
            "p1": {
                "outputs": {
                    "9": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]},
                    "12": {"text": ["hello"]}
                },
                "status": {"completed": true}
            }
        }"#;
        let history: IndexMap<String, HistoryEntry> = serde_json::from_str(json).unwrap();
        let entry = &history["p1"];
        let keys: Vec<_> = entry.outputs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["9", "12"]);
        assert_eq!(
            entry.outputs["9"].images.as_deref(),
            Some(
                &[ImageRef {
                    filename: "a.png".into(),
                    subfolder: String::new(),
                    folder_type: "output".into(),
                }][..]
            )
        );
        assert!(entry.outputs["12"].images.is_none());
    }

    #[test]
    fn image_ref_defaults() {
        let image: ImageRef = serde_json::from_str(r#"{"filename": "x.png"}"#).unwrap();
        assert_eq!(image.subfolder, "");
        assert_eq!(image.folder_type, "output");
    }

    #[test]
    fn submit_response_without_number() {
        let resp: SubmitResponse = serde_json::from_str(r#"{"prompt_id": "abc"}"#).unwrap();
        assert_eq!(resp.prompt_id, "abc");
        assert_eq!(resp.number, 0);
    }
}
