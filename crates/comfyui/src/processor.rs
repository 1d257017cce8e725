//! WebSocket message processing for a single prompt.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants and returns once the awaited
//! prompt completes, fails, or the wait times out.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{ComfyUIClientError, ComfyUIStream};
use crate::messages::{parse_message, ComfyUIMessage, ErrorData, ProgressData};

/// What a single text frame means for the prompt being awaited.
enum Outcome {
    Pending,
    Completed,
    Failed(ComfyUIClientError),
}

/// Wait until ComfyUI reports that `prompt_id` has finished.
///
/// Completion is an `executing` message with a null node and a matching
/// `prompt_id`. Messages for other prompts, unparseable text frames and
/// binary preview frames are skipped. With `timeout` set to `None` the
/// wait is unbounded.
pub async fn wait_for_completion(
    ws_stream: &mut ComfyUIStream,
    prompt_id: &str,
    timeout: Option<Duration>,
) -> Result<(), ComfyUIClientError> {
    let started = Instant::now();
    match timeout {
        Some(limit) => tokio::time::timeout(limit, process_messages(ws_stream, prompt_id))
            .await
            .map_err(|_| ComfyUIClientError::Timeout {
                prompt_id: prompt_id.to_string(),
                elapsed: started.elapsed(),
            })?,
        None => process_messages(ws_stream, prompt_id).await,
    }
}

/// Read frames until the prompt's fate is known or the socket ends.
async fn process_messages(
    ws_stream: &mut ComfyUIStream,
    prompt_id: &str,
) -> Result<(), ComfyUIClientError> {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match handle_text_message(&text, prompt_id) {
                Outcome::Pending => {}
                Outcome::Completed => return Ok(()),
                Outcome::Failed(e) => return Err(e),
            },
            Ok(Message::Binary(_)) => {
                // ComfyUI sends binary messages for preview images.
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "WebSocket receive error: {e}"
                )));
            }
        }
    }

    Err(ComfyUIClientError::Closed {
        prompt_id: prompt_id.to_string(),
    })
}

/// Interpret a single text frame relative to the awaited prompt.
fn handle_text_message(text: &str, prompt_id: &str) -> Outcome {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
            return Outcome::Pending;
        }
    };

    if msg.is_completion_of(prompt_id) {
        tracing::debug!(prompt_id, "Prompt finished executing");
        return Outcome::Completed;
    }

    // Events about other prompts on the shared socket.
    if msg.prompt_id().is_some_and(|id| id != prompt_id) {
        return Outcome::Pending;
    }

    match msg {
        ComfyUIMessage::Progress(data) => {
            handle_progress(prompt_id, &data);
            Outcome::Pending
        }
        ComfyUIMessage::ExecutionStart(_) => {
            tracing::info!(prompt_id, "Execution started");
            Outcome::Pending
        }
        ComfyUIMessage::Executing(data) => {
            if let Some(node) = data.node {
                tracing::trace!(prompt_id, node = %node, "Executing node");
            }
            Outcome::Pending
        }
        ComfyUIMessage::Executed(data) => {
            tracing::debug!(
                prompt_id,
                node = %data.node,
                images = data.output.images.len(),
                "Node produced output",
            );
            Outcome::Pending
        }
        ComfyUIMessage::ExecutionError(data) => Outcome::Failed(execution_error(data)),
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(prompt_id, cached = data.nodes.len(), "Execution used cache");
            Outcome::Pending
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
            Outcome::Pending
        }
        ComfyUIMessage::ExecutionSuccess(_) => Outcome::Pending,
    }
}

fn handle_progress(prompt_id: &str, data: &ProgressData) {
    tracing::debug!(
        prompt_id,
        value = data.value,
        max = data.max,
        percent = data.percent(),
        "Generation progress",
    );
}

fn execution_error(data: ErrorData) -> ComfyUIClientError {
    tracing::error!(
        prompt_id = %data.prompt_id,
        node_id = ?data.node_id,
        exception_type = %data.exception_type,
        "ComfyUI execution error: {}",
        data.exception_message,
    );
    ComfyUIClientError::Execution {
        prompt_id: data.prompt_id,
        node: data.node_id.unwrap_or_else(|| "<unknown>".to_string()),
        exception_type: data.exception_type,
        message: data.exception_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn outcome(text: &str) -> Outcome {
        handle_text_message(text, "p1")
    }

    #[test]
    fn completion_for_awaited_prompt() {
        assert!(matches!(
            outcome(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#),
            Outcome::Completed
        ));
    }

    #[test]
    fn completion_for_other_prompt_is_pending() {
        assert!(matches!(
            outcome(r#"{"type":"executing","data":{"node":null,"prompt_id":"p2"}}"#),
            Outcome::Pending
        ));
    }

    #[test]
    fn error_for_awaited_prompt_fails() {
        let result = outcome(
            r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"3","exception_message":"boom","exception_type":"ValueError"}}"#,
        );
        match result {
            Outcome::Failed(err) => assert_matches!(
                err,
                ComfyUIClientError::Execution { node, message, .. } if node == "3" && message == "boom"
            ),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn error_for_other_prompt_is_pending() {
        assert!(matches!(
            outcome(r#"{"type":"execution_error","data":{"prompt_id":"p9","exception_message":"boom","exception_type":"E"}}"#),
            Outcome::Pending
        ));
    }

    #[test]
    fn node_output_is_pending() {
        assert!(matches!(
            outcome(r#"{"type":"executed","data":{"node":"9","prompt_id":"p1","output":{"images":[{"filename":"a.png"}]}}}"#),
            Outcome::Pending
        ));
    }

    #[test]
    fn garbage_is_pending() {
        assert!(matches!(outcome("not json"), Outcome::Pending));
        assert!(matches!(outcome(r#"{"type":"crystools.monitor","data":{}}"#), Outcome::Pending));
    }
}
