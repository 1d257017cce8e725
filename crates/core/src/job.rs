//! Jobs handed out by the coordination server.
//!
//! The server is loose about scalar types: `job_id`, `number` and `seed`
//! arrive as either JSON strings or numbers, so they are normalised on
//! the way in.

use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Prompts longer than this are shortened in log banners.
pub const PROMPT_PREVIEW_CHARS: usize = 60;

/// Status string for "no work left".
pub const STATUS_EMPTY: &str = "empty";

/// Status string for "here is a job".
pub const STATUS_OK: &str = "ok";

/// One unit of work. Consumed once, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Job {
    #[serde(default, deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, rename = "number", deserialize_with = "string_or_number")]
    pub sequence_number: String,
    #[serde(default, rename = "text_prompt")]
    pub prompt_text: String,
    #[serde(default, rename = "char_name_input")]
    pub character_name: String,
    #[serde(default, deserialize_with = "optional_seed")]
    pub seed: Option<u64>,
    #[serde(default, rename = "png_file")]
    pub target_png_path: Option<String>,
}

/// Raw body of a `get_job` response.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task: Option<Job>,
    /// Compressed workflow for the HD pipeline.
    #[serde(default, rename = "WORKFLOW")]
    pub workflow: Option<String>,
}

/// Interpreted `get_job` response.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// No work left; the worker should drain and stop.
    Empty,
    /// A job to run, with the compressed workflow when the server sent one.
    Assigned { job: Job, workflow: Option<String> },
    /// Any other status. Treated as fatal by the poll loop.
    Unknown(Option<String>),
}

impl PollResponse {
    pub fn into_poll(self) -> JobPoll {
        match self.status.as_deref() {
            Some(STATUS_EMPTY) => JobPoll::Empty,
            Some(STATUS_OK) => JobPoll::Assigned {
                job: self.task.unwrap_or_default(),
                workflow: self.workflow,
            },
            _ => JobPoll::Unknown(self.status),
        }
    }
}

impl Job {
    /// Prompt shortened to [`PROMPT_PREVIEW_CHARS`] characters for logging.
    pub fn short_prompt(&self) -> String {
        if self.prompt_text.chars().count() > PROMPT_PREVIEW_CHARS {
            let head: String = self.prompt_text.chars().take(PROMPT_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.prompt_text.clone()
        }
    }

    /// File stem of `png_file`, used to name HD outputs.
    pub fn file_prefix(&self) -> Option<String> {
        let path = self.target_png_path.as_deref()?;
        Path::new(path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

fn optional_seed<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("seed must be a non-negative integer, got {n}"))),
        Some(Scalar::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Scalar::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("seed must be a non-negative integer, got '{s}'"))),
    }
}
