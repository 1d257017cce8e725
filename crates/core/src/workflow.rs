//! Typed model of a ComfyUI API-format workflow document.
//!
//! A document is an ordered map from node ID to [`WorkflowNode`]. Each
//! node carries a `class_type`, an `inputs` map of [`InputValue`]s and an
//! optional `_meta.title`. Nodes are located by class type (seed source,
//! checkpoint loader) or by title tag (prompt nodes). Documents hold tens
//! of nodes, so every lookup is a linear scan.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::canonical::to_ascii_json;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Well-known node markers
// ---------------------------------------------------------------------------

/// Class type of the node that feeds the sampler seed.
pub const SEED_CLASS: &str = "easy seed";

/// Class type of the checkpoint loader.
pub const CHECKPOINT_LOADER_CLASS: &str = "CheckpointLoaderSimple";

/// Title tag of the positive prompt node.
pub const POSITIVE_PROMPT_TITLE: &str = "POSITIVE_PROMPT";

/// Title tag of the negative prompt node.
pub const NEGATIVE_PROMPT_TITLE: &str = "NEGATIVE_PROMPT";

/// Input names used by the accessors below.
const SEED_INPUT: &str = "seed";
const CKPT_INPUT: &str = "ckpt_name";
const TEXT_INPUT: &str = "text";
const IMAGE_INPUT: &str = "image";

/// HD rewiring: node `24` reads its image from output 0 of node `7`.
const HD_IMAGE_NODE: &str = "24";
const HD_SOURCE_NODE: &str = "7";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A workflow graph keyed by node ID. Key order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDocument {
    nodes: IndexMap<String, WorkflowNode>,
}

/// One step of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, InputValue>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    /// Any other node fields, kept verbatim.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// Editor metadata attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// Reference to output slot `.1` of node `.0`, serialized as `["7", 0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

/// A node input, tagged by the kind of value it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Link(NodeLink),
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    /// Lists, objects and nulls that are not links.
    Other(serde_json::Value),
}

/// Which prompt node to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Positive,
    Negative,
}

/// Output resolution of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Standard,
    High,
}

// ---------------------------------------------------------------------------
// InputValue helpers
// ---------------------------------------------------------------------------

impl InputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&NodeLink> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Link(NodeLink(node, slot)) => serde_json::json!([node, slot]),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Other(v) => v.clone(),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for InputValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NodeLink> for InputValue {
    fn from(value: NodeLink) -> Self {
        Self::Link(value)
    }
}

impl PromptKind {
    /// The `_meta.title` tag that marks this prompt node.
    pub fn title(self) -> &'static str {
        match self {
            Self::Positive => POSITIVE_PROMPT_TITLE,
            Self::Negative => NEGATIVE_PROMPT_TITLE,
        }
    }
}

impl WorkflowNode {
    /// Title tag from `_meta`, if any.
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.title.as_deref())
    }
}

// ---------------------------------------------------------------------------
// WorkflowDocument
// ---------------------------------------------------------------------------

impl WorkflowDocument {
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Read and parse a workflow file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| CoreError::io(path, e))?;
        Self::from_slice(&bytes)
    }

    /// Write the document as pretty JSON (two-space indent).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| CoreError::io(path, e))
    }

    pub fn to_value(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Compact, ASCII-only JSON. This is the exact string embedded in PNG
    /// metadata chunks.
    pub fn to_canonical_json(&self) -> Result<String, CoreError> {
        Ok(to_ascii_json(self)?)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// First node whose `_meta.title` equals `title`.
    pub fn find_by_title(&self, title: &str) -> Option<&WorkflowNode> {
        self.nodes.values().find(|n| n.title() == Some(title))
    }

    fn find_by_title_mut(&mut self, title: &str) -> Option<&mut WorkflowNode> {
        self.nodes.values_mut().find(|n| n.title() == Some(title))
    }

    /// First input named `input` on a node of class `class_type`.
    fn class_input(
        &self,
        class_type: &'static str,
        input: &'static str,
    ) -> Result<&InputValue, CoreError> {
        self.nodes
            .values()
            .filter(|n| n.class_type == class_type)
            .find_map(|n| n.inputs.get(input))
            .ok_or(CoreError::MissingNode { class_type, input })
    }

    fn class_input_mut(
        &mut self,
        class_type: &'static str,
        input: &'static str,
    ) -> Result<&mut InputValue, CoreError> {
        self.nodes
            .values_mut()
            .filter(|n| n.class_type == class_type)
            .find_map(|n| n.inputs.get_mut(input))
            .ok_or(CoreError::MissingNode { class_type, input })
    }

    // ---- seed ----

    pub fn seed(&self) -> Result<&InputValue, CoreError> {
        self.class_input(SEED_CLASS, SEED_INPUT)
    }

    /// Overwrite the seed on the seed-source node.
    pub fn set_seed(&mut self, seed: u64) -> Result<(), CoreError> {
        *self.class_input_mut(SEED_CLASS, SEED_INPUT)? = seed.into();
        Ok(())
    }

    // ---- prompts ----

    pub fn prompt(&self, kind: PromptKind) -> Option<&str> {
        self.find_by_title(kind.title())
            .and_then(|n| n.inputs.get(TEXT_INPUT))
            .and_then(InputValue::as_str)
    }

    /// Overwrite the text of the prompt node tagged for `kind`.
    ///
    /// Returns `false` when the document has no such node.
    pub fn set_prompt(&mut self, kind: PromptKind, text: &str) -> bool {
        match self.find_by_title_mut(kind.title()) {
            Some(node) => {
                node.inputs.insert(TEXT_INPUT.to_string(), text.into());
                true
            }
            None => false,
        }
    }

    // ---- checkpoint ----

    pub fn model(&self) -> Result<&InputValue, CoreError> {
        self.class_input(CHECKPOINT_LOADER_CLASS, CKPT_INPUT)
    }

    pub fn set_model(&mut self, name: &str) -> Result<(), CoreError> {
        *self.class_input_mut(CHECKPOINT_LOADER_CLASS, CKPT_INPUT)? = name.into();
        Ok(())
    }

    // ---- resolution ----

    /// Apply the fixed graph edit for `resolution`.
    ///
    /// For [`Resolution::High`] the image input of node `24` is pointed at
    /// output 0 of node `7`. Returns whether the graph changed.
    pub fn apply_resolution(&mut self, resolution: Resolution) -> bool {
        if resolution != Resolution::High {
            return false;
        }
        match self.nodes.get_mut(HD_IMAGE_NODE) {
            Some(node) => {
                node.inputs.insert(
                    IMAGE_INPUT.to_string(),
                    NodeLink(HD_SOURCE_NODE.to_string(), 0).into(),
                );
                true
            }
            None => false,
        }
    }

    // ---- generic replacement ----

    /// Replace every scalar input equal to `old` with `new`, descending into
    /// nested lists and objects. Links are edges, not values, and are left
    /// alone. Returns the number of replacements.
    pub fn replace_value(&mut self, old: &InputValue, new: &InputValue) -> usize {
        let old_json = old.to_json();
        let new_json = new.to_json();
        let mut count = 0;

        for node in self.nodes.values_mut() {
            for value in node.inputs.values_mut() {
                match value {
                    InputValue::Link(_) => {}
                    InputValue::Other(inner) => {
                        count += replace_nested(inner, &old_json, &new_json);
                    }
                    scalar if *scalar == *old => {
                        *scalar = new.clone();
                        count += 1;
                    }
                    _ => {}
                }
            }
        }
        count
    }
}

fn replace_nested(
    value: &mut serde_json::Value,
    old: &serde_json::Value,
    new: &serde_json::Value,
) -> usize {
    match value {
        serde_json::Value::Array(items) => items
            .iter_mut()
            .map(|item| replace_nested(item, old, new))
            .sum(),
        serde_json::Value::Object(map) => map
            .values_mut()
            .map(|item| replace_nested(item, old, new))
            .sum(),
        scalar if *scalar == *old => {
            *scalar = new.clone();
            1
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample() -> WorkflowDocument {
        WorkflowDocument::from_value(serde_json::json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {"seed": ["5", 0], "steps": 20, "cfg": 7.5, "model": ["4", 0]}
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": {"ckpt_name": "base.safetensors"}
            },
            "5": {
                "class_type": "easy seed",
                "inputs": {"seed": 1}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "old positive", "clip": ["4", 1]},
                "_meta": {"title": "POSITIVE_PROMPT"}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "old negative", "clip": ["4", 1]},
                "_meta": {"title": "NEGATIVE_PROMPT"}
            },
            "24": {
                "class_type": "LoadImage",
                "inputs": {"image": "input.png", "upload": "image"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn inputs_are_tagged_by_kind() {
        let doc = sample();
        let sampler = doc.node("3").unwrap();
        assert_eq!(sampler.inputs["seed"], InputValue::Link(NodeLink("5".into(), 0)));
        assert_eq!(sampler.inputs["steps"].as_u64(), Some(20));
        assert_matches!(sampler.inputs["cfg"], InputValue::Number(_));
        assert_eq!(doc.node("4").unwrap().inputs["ckpt_name"].as_str(), Some("base.safetensors"));
    }

    #[test]
    fn node_order_is_preserved() {
        let binding = sample();
        let ids: Vec<&str> = binding.nodes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["3", "4", "5", "6", "7", "24"]);
    }

    #[test]
    fn set_prompt_then_read_returns_written_text() {
        let mut doc = sample();
        assert!(doc.set_prompt(PromptKind::Positive, "a red fox"));
        assert!(doc.set_prompt(PromptKind::Negative, "blurry"));
        assert_eq!(doc.prompt(PromptKind::Positive), Some("a red fox"));
        assert_eq!(doc.prompt(PromptKind::Negative), Some("blurry"));
    }

    #[test]
    fn set_prompt_without_tagged_node_returns_false() {
        let mut doc = WorkflowDocument::from_value(serde_json::json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "x"}}
        }))
        .unwrap();
        assert!(!doc.set_prompt(PromptKind::Positive, "ignored"));
        assert_eq!(doc.prompt(PromptKind::Positive), None);
    }

    #[test]
    fn set_seed_then_read_yields_value() {
        let mut doc = sample();
        doc.set_seed(42).unwrap();
        assert_eq!(doc.seed().unwrap().as_u64(), Some(42));
        // The sampler's link to the seed node is untouched.
        assert!(doc.node("3").unwrap().inputs["seed"].as_link().is_some());
    }

    #[test]
    fn set_seed_without_seed_node_fails() {
        let mut doc = WorkflowDocument::from_value(serde_json::json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 7}}
        }))
        .unwrap();
        assert_matches!(
            doc.set_seed(42),
            Err(CoreError::MissingNode { class_type: SEED_CLASS, .. })
        );
        assert_matches!(doc.seed(), Err(CoreError::MissingNode { .. }));
    }

    #[test]
    fn model_read_and_write() {
        let mut doc = sample();
        assert_eq!(doc.model().unwrap().as_str(), Some("base.safetensors"));
        doc.set_model("other.safetensors").unwrap();
        assert_eq!(doc.model().unwrap().as_str(), Some("other.safetensors"));
    }

    #[test]
    fn model_without_loader_fails() {
        let mut doc = WorkflowDocument::default();
        assert_matches!(doc.model(), Err(CoreError::MissingNode { .. }));
        assert_matches!(doc.set_model("x"), Err(CoreError::MissingNode { .. }));
    }

    #[test]
    fn high_resolution_rewires_image_input() {
        let mut doc = sample();
        assert!(doc.apply_resolution(Resolution::High));
        assert_eq!(
            doc.node("24").unwrap().inputs["image"],
            InputValue::Link(NodeLink("7".into(), 0))
        );
    }

    #[test]
    fn standard_resolution_leaves_graph_alone() {
        let mut doc = sample();
        let before = doc.clone();
        assert!(!doc.apply_resolution(Resolution::Standard));
        assert_eq!(doc, before);
    }

    #[test]
    fn high_resolution_without_target_node_is_noop() {
        let mut doc = WorkflowDocument::default();
        assert!(!doc.apply_resolution(Resolution::High));
    }

    #[test]
    fn replace_value_skips_links_and_descends_into_lists() {
        let mut doc = WorkflowDocument::from_value(serde_json::json!({
            "1": {"class_type": "A", "inputs": {"name": "7", "list": ["7", "8", {"k": "7"}], "link": ["7", 0]}}
        }))
        .unwrap();
        let count = doc.replace_value(&"7".into(), &"9".into());
        assert_eq!(count, 3);
        let node = doc.node("1").unwrap();
        assert_eq!(node.inputs["name"].as_str(), Some("9"));
        assert_eq!(node.inputs["link"], InputValue::Link(NodeLink("7".into(), 0)));
    }

    #[test]
    fn unknown_node_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "1": {"class_type": "A", "inputs": {}, "is_changed": ["abc"], "_meta": {"title": "T", "color": "red"}}
        });
        let doc = WorkflowDocument::from_value(raw.clone()).unwrap();
        assert_eq!(doc.to_value().unwrap(), raw);
    }

    #[test]
    fn save_and_reload_twice_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");

        let doc = sample();
        doc.save(&first).unwrap();
        let reloaded = WorkflowDocument::load(&first).unwrap();
        reloaded.save(&second).unwrap();
        let reloaded_again = WorkflowDocument::load(&second).unwrap();

        assert_eq!(doc, reloaded);
        assert_eq!(reloaded, reloaded_again);
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            std::fs::read_to_string(&second).unwrap()
        );
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = WorkflowDocument::load("/definitely/not/here.json").unwrap_err();
        assert_matches!(err, CoreError::Io { .. });
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn node_without_class_type_is_rejected() {
        let result = WorkflowDocument::from_json_str(r#"{"1": {"inputs": {}}}"#);
        assert_matches!(result, Err(CoreError::Json(_)));
    }
}
