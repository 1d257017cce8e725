//! One prompt, end to end: submit, await completion, download images.

use std::time::Duration;

use async_trait::async_trait;

use forge_core::types::GenerationResult;
use forge_core::workflow::WorkflowDocument;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::endpoint::BackendEndpoint;
use crate::processor::wait_for_completion;

/// Errors that stop a prompt before it reaches the completion wait.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Client(#[from] ComfyUIClientError),
}

/// Anything that can turn a workflow document into images.
///
/// `Ok(None)` means the prompt was accepted but produced no usable result
/// (failed wait, missing history); the caller should log and move on.
#[async_trait]
pub trait ImageBackend: Send {
    async fn run_prompt(
        &mut self,
        workflow: &WorkflowDocument,
    ) -> Result<Option<GenerationResult>, GeneratorError>;
}

/// [`ImageBackend`] backed by a ComfyUI server.
///
/// The WebSocket is opened lazily on the first prompt and reused for the
/// following ones. A failed wait drops it so the next prompt reconnects.
pub struct ComfyGenerator {
    api: ComfyUIApi,
    client: ComfyUIClient,
    connection: Option<ComfyUIConnection>,
    completion_timeout: Option<Duration>,
}

impl ComfyGenerator {
    pub fn new(
        endpoint: &BackendEndpoint,
        token: Option<String>,
        completion_timeout: Option<Duration>,
    ) -> Self {
        Self {
            api: ComfyUIApi::new(endpoint.http_url(), token.clone()),
            client: ComfyUIClient::new(endpoint.ws_url(), token),
            connection: None,
            completion_timeout,
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn client_id(&self) -> &str {
        self.client.client_id()
    }

    /// Download every image listed in the history entry of `prompt_id`.
    ///
    /// Individual download failures are logged and the image is skipped.
    async fn fetch_results(&self, prompt_id: &str) -> Option<GenerationResult> {
        let mut history = match self.api.get_history(prompt_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(prompt_id, error = %e, "Failed to fetch history");
                return None;
            }
        };
        let Some(entry) = history.shift_remove(prompt_id) else {
            tracing::error!(prompt_id, "History has no entry for prompt");
            return None;
        };

        let mut result = GenerationResult::new();
        for (node_id, output) in entry.outputs {
            let Some(images) = output.images else {
                continue;
            };
            let mut blobs = Vec::with_capacity(images.len());
            for image in &images {
                match self.api.view_image(image).await {
                    Ok(bytes) => blobs.push(bytes),
                    Err(e) => {
                        tracing::error!(
                            prompt_id,
                            node_id = %node_id,
                            filename = %image.filename,
                            error = %e,
                            "Failed to download image",
                        );
                    }
                }
            }
            result.insert(node_id, blobs);
        }
        Some(result)
    }
}

#[async_trait]
impl ImageBackend for ComfyGenerator {
    async fn run_prompt(
        &mut self,
        workflow: &WorkflowDocument,
    ) -> Result<Option<GenerationResult>, GeneratorError> {
        if self.connection.is_none() {
            self.connection = Some(self.client.connect().await?);
        }

        let submitted = self
            .api
            .submit_workflow(workflow, self.client.client_id())
            .await?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(prompt_id = %prompt_id, queue_number = submitted.number, "Prompt queued");

        if let Some(connection) = self.connection.as_mut() {
            let waited =
                wait_for_completion(&mut connection.ws_stream, &prompt_id, self.completion_timeout)
                    .await;
            if let Err(e) = waited {
                tracing::error!(prompt_id = %prompt_id, error = %e, "Failed waiting for prompt");
                self.connection = None;
                return Ok(None);
            }
        }

        Ok(self.fetch_results(&prompt_id).await)
    }
}
