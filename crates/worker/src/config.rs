//! Worker configuration.
//!
//! Built once at startup from the environment (after `.env` is loaded),
//! then adjusted by command-line flags and shared as `Arc<WorkerConfig>`.

use std::path::PathBuf;
use std::time::Duration;

use forge_core::identity::{WorkerIdentity, INSTANCE_LABEL_ENV};

pub const DEFAULT_COMFYUI_SERVER: &str = "127.0.0.1:8188";
pub const DEFAULT_COORDINATOR_URL: &str = "http://aichanstudio.xyz/vastai_server";
pub const DEFAULT_VASTAI_API_URL: &str = "https://console.vast.ai/api/v0";
pub const DEFAULT_WORKFLOW_FILE: &str = "workflow.json";
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
const DEFAULT_READY_CHECK_INTERVAL_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Everything the worker needs to know, resolved once.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI `host:port`.
    pub comfyui_server: String,
    /// Bearer token for ComfyUI.
    pub comfyui_token: Option<String>,
    /// Coordination server base URL, without trailing slash.
    pub coordinator_url: String,
    /// Compute-provider control API base URL.
    pub vastai_api_url: String,
    pub vastai_api_key: Option<String>,
    pub identity: WorkerIdentity,
    /// Cached workflow template for the standard pipeline.
    pub workflow_file: PathBuf,
    pub output_dir: PathBuf,
    /// `None` waits for completion indefinitely.
    pub completion_timeout: Option<Duration>,
    pub upload_concurrency: usize,
    pub ready_check_interval: Duration,
    pub skip_ready_check: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                                 |
    /// |-----------------------------|-----------------------------------------|
    /// | `OPEN_BUTTON_TOKEN`         | unset                                   |
    /// | `VAST_CONTAINERLABEL`       | unset (identity `local-pc`)             |
    /// | `COMFYUI_SERVER`            | `127.0.0.1:8188`                        |
    /// | `COORDINATOR_URL`           | `http://aichanstudio.xyz/vastai_server` |
    /// | `VASTAI_API_URL`            | `https://console.vast.ai/api/v0`        |
    /// | `VASTAI_API_KEY`            | unset                                   |
    /// | `WORKFLOW_FILE`             | `workflow.json`                         |
    /// | `OUTPUT_DIR`                | `.`                                     |
    /// | `COMPLETION_TIMEOUT_SECS`   | `1800` (`0` = no timeout)               |
    /// | `UPLOAD_CONCURRENCY`        | `4`                                     |
    /// | `READY_CHECK_INTERVAL_SECS` | `5`                                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let completion_timeout_secs: u64 = parse_or(
            "COMPLETION_TIMEOUT_SECS",
            get("COMPLETION_TIMEOUT_SECS"),
            DEFAULT_COMPLETION_TIMEOUT_SECS,
            "a whole number of seconds",
        )?;

        let upload_concurrency: usize = parse_or(
            "UPLOAD_CONCURRENCY",
            get("UPLOAD_CONCURRENCY"),
            DEFAULT_UPLOAD_CONCURRENCY,
            "a positive integer",
        )?;
        if upload_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_CONCURRENCY",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let ready_check_interval_secs: u64 = parse_or(
            "READY_CHECK_INTERVAL_SECS",
            get("READY_CHECK_INTERVAL_SECS"),
            DEFAULT_READY_CHECK_INTERVAL_SECS,
            "a whole number of seconds",
        )?;

        Ok(Self {
            comfyui_server: get("COMFYUI_SERVER").unwrap_or_else(|| DEFAULT_COMFYUI_SERVER.into()),
            comfyui_token: get("OPEN_BUTTON_TOKEN"),
            coordinator_url: get("COORDINATOR_URL")
                .unwrap_or_else(|| DEFAULT_COORDINATOR_URL.into())
                .trim_end_matches('/')
                .to_string(),
            vastai_api_url: get("VASTAI_API_URL")
                .unwrap_or_else(|| DEFAULT_VASTAI_API_URL.into())
                .trim_end_matches('/')
                .to_string(),
            vastai_api_key: get("VASTAI_API_KEY"),
            identity: WorkerIdentity::from_instance_label(get(INSTANCE_LABEL_ENV).as_deref()),
            workflow_file: get("WORKFLOW_FILE")
                .unwrap_or_else(|| DEFAULT_WORKFLOW_FILE.into())
                .into(),
            output_dir: get("OUTPUT_DIR").unwrap_or_else(|| ".".into()).into(),
            completion_timeout: (completion_timeout_secs > 0)
                .then(|| Duration::from_secs(completion_timeout_secs)),
            upload_concurrency,
            ready_check_interval: Duration::from_secs(ready_check_interval_secs),
            skip_ready_check: false,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.comfyui_server, "127.0.0.1:8188");
        assert_eq!(c.coordinator_url, DEFAULT_COORDINATOR_URL);
        assert_eq!(c.vastai_api_url, DEFAULT_VASTAI_API_URL);
        assert_eq!(c.workflow_file, PathBuf::from("workflow.json"));
        assert_eq!(c.output_dir, PathBuf::from("."));
        assert_eq!(c.completion_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(c.upload_concurrency, 4);
        assert_eq!(c.ready_check_interval, Duration::from_secs(5));
        assert_eq!(c.identity.as_str(), "local-pc");
        assert!(c.comfyui_token.is_none());
        assert!(c.vastai_api_key.is_none());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("OPEN_BUTTON_TOKEN", "tok"),
            ("VAST_CONTAINERLABEL", "C.25862941"),
            ("COORDINATOR_URL", "http://localhost:9000/api/"),
            ("COMPLETION_TIMEOUT_SECS", "0"),
            ("UPLOAD_CONCURRENCY", "2"),
        ])
        .unwrap();
        assert_eq!(c.comfyui_token.as_deref(), Some("tok"));
        assert_eq!(c.identity.as_str(), "VastAi-25862941");
        assert_eq!(c.coordinator_url, "http://localhost:9000/api");
        assert_eq!(c.completion_timeout, None);
        assert_eq!(c.upload_concurrency, 2);
    }

    #[test]
    fn empty_values_are_unset() {
        let c = config(&[("OPEN_BUTTON_TOKEN", ""), ("VASTAI_API_KEY", "  ")]).unwrap();
        assert!(c.comfyui_token.is_none());
        assert!(c.vastai_api_key.is_none());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config(&[("COMPLETION_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "COMPLETION_TIMEOUT_SECS must be a whole number of seconds, got 'soon'"
        );
        assert!(config(&[("UPLOAD_CONCURRENCY", "0")]).is_err());
    }
}
