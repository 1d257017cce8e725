//! Typed view of the events ComfyUI pushes over `/ws`.
//!
//! Every text frame is `{"type": "<event>", "data": {...}}`. The worker
//! only needs enough of each payload to follow one prompt to completion,
//! so anything beyond the prompt id, node id and error text is optional
//! and unknown fields are ignored.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue broadcast. The first one after connecting carries `sid`.
    Status(StatusData),
    ExecutionStart(PromptRef),
    ExecutionCached(ExecutionCachedData),
    /// `node == None` with our prompt id means the prompt is done.
    Executing(ExecutingData),
    Progress(ProgressData),
    /// An output node finished; `output.images` lists what it saved.
    Executed(ExecutedData),
    ExecutionError(ErrorData),
    ExecutionSuccess(PromptRef),
}

impl ComfyUIMessage {
    /// Whether this is the end-of-prompt marker for `prompt_id`.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        matches!(
            self,
            ComfyUIMessage::Executing(ExecutingData { node: None, prompt_id: Some(id) })
                if id == prompt_id
        )
    }

    /// Prompt the event belongs to, when it says.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(_) => None,
            ComfyUIMessage::ExecutionStart(data) | ComfyUIMessage::ExecutionSuccess(data) => {
                Some(&data.prompt_id)
            }
            ComfyUIMessage::ExecutionCached(data) => Some(&data.prompt_id),
            ComfyUIMessage::Executing(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Progress(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Executed(data) => Some(&data.prompt_id),
            ComfyUIMessage::ExecutionError(data) => Some(&data.prompt_id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Sampler steps within one node.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Whole percent, `0` when `max` is not positive.
    pub fn percent(&self) -> i32 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i32
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub prompt_id: String,
    #[serde(default)]
    pub output: NodeOutputs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutputs {
    #[serde(default)]
    pub images: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Parse one text frame. Unknown event types are an error; the caller
/// logs and skips them.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(json: &str) -> ComfyUIMessage {
        parse_message(json).unwrap()
    }

    #[test]
    fn finished_marker_matches_only_its_prompt() {
        let msg = parse(r#"{"type":"executing","data":{"node":null,"prompt_id":"fox-42"}}"#);
        assert!(msg.is_completion_of("fox-42"));
        assert!(!msg.is_completion_of("fox-43"));
    }

    #[test]
    fn running_node_is_not_the_finished_marker() {
        let msg = parse(r#"{"type":"executing","data":{"node":"3","prompt_id":"fox-42"}}"#);
        assert!(!msg.is_completion_of("fox-42"));
        assert_eq!(msg.prompt_id(), Some("fox-42"));
    }

    #[test]
    fn legacy_finished_marker_without_prompt_id_is_ignored() {
        let msg = parse(r#"{"type":"executing","data":{"node":null}}"#);
        assert!(!msg.is_completion_of("fox-42"));
        assert_eq!(msg.prompt_id(), None);
    }

    #[test]
    fn first_status_carries_session_id() {
        let msg = parse(
            r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":0}},"sid":"c0ffee"}}"#,
        );
        assert_matches!(msg, ComfyUIMessage::Status(StatusData { sid: Some(ref sid), .. }) if sid == "c0ffee");
        assert_eq!(msg.prompt_id(), None);
    }

    #[test]
    fn sampler_progress_with_and_without_ids() {
        let tagged = parse(r#"{"type":"progress","data":{"value":15,"max":20,"prompt_id":"p","node":"3"}}"#);
        assert_matches!(tagged, ComfyUIMessage::Progress(ref data) if data.percent() == 75 && data.node.as_deref() == Some("3"));

        let bare = parse(r#"{"type":"progress","data":{"value":3,"max":0}}"#);
        assert_matches!(bare, ComfyUIMessage::Progress(ref data) if data.percent() == 0 && data.prompt_id.is_none());
    }

    #[test]
    fn save_node_output_lists_images() {
        let msg = parse(
            r#"{"type":"executed","data":{"node":"9","prompt_id":"p","output":{"images":[{"filename":"fox_00001_.png","subfolder":"","type":"output"},{"filename":"fox_00002_.png","subfolder":"","type":"output"}]}}}"#,
        );
        assert_matches!(msg, ComfyUIMessage::Executed(ref data) if data.node == "9" && data.output.images.len() == 2);
    }

    #[test]
    fn preview_node_output_without_images() {
        let msg = parse(r#"{"type":"executed","data":{"node":"12","prompt_id":"p","output":{"text":["done"]}}}"#);
        assert_matches!(msg, ComfyUIMessage::Executed(ref data) if data.output.images.is_empty());
    }

    #[test]
    fn error_with_only_prompt_id_still_parses() {
        let msg = parse(r#"{"type":"execution_error","data":{"prompt_id":"p"}}"#);
        assert_matches!(
            msg,
            ComfyUIMessage::ExecutionError(ErrorData { ref node_id, ref exception_message, .. })
                if node_id.is_none() && exception_message.is_empty()
        );
    }

    #[test]
    fn success_ignores_timestamp() {
        let msg = parse(r#"{"type":"execution_success","data":{"prompt_id":"p","timestamp":1700000000}}"#);
        assert_matches!(msg, ComfyUIMessage::ExecutionSuccess(PromptRef { ref prompt_id }) if prompt_id == "p");
    }

    #[test]
    fn cached_nodes_default_to_empty() {
        let msg = parse(r#"{"type":"execution_cached","data":{"prompt_id":"p"}}"#);
        assert_matches!(msg, ComfyUIMessage::ExecutionCached(ref data) if data.nodes.is_empty());
    }

    #[test]
    fn custom_node_events_are_rejected() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{"cpu_utilization":12}}"#).is_err());
        assert!(parse_message("{").is_err());
    }
}
