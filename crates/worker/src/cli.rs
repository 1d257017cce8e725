//! Command-line flags for the `forge-worker` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::WorkerConfig;

/// Prefix of the legacy positional API key argument.
const LEGACY_API_KEY_PREFIX: &str = "API=";

/// Image-generation worker: polls the coordination server, renders jobs on
/// ComfyUI and uploads the results.
#[derive(Debug, Parser)]
#[command(name = "forge-worker", version)]
pub struct Cli {
    /// Compute-provider API key used to destroy this instance when done.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Path of the cached workflow template.
    #[arg(long)]
    pub workflow_file: Option<PathBuf>,

    /// Root directory for generated images.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Start polling without waiting for ComfyUI to answer.
    #[arg(long)]
    pub skip_ready_check: bool,

    /// Legacy positional arguments; `API=<key>` sets the API key.
    #[arg(hide = true)]
    pub legacy: Vec<String>,
}

impl Cli {
    /// API key from `--api-key`, else from the first `API=<key>` argument.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.legacy
                .iter()
                .find_map(|arg| arg.strip_prefix(LEGACY_API_KEY_PREFIX))
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
    }

    /// Override environment-derived settings with whatever was passed.
    pub fn apply(&self, config: &mut WorkerConfig) {
        if let Some(key) = self.resolved_api_key() {
            config.vastai_api_key = Some(key);
        }
        if let Some(path) = &self.workflow_file {
            config.workflow_file = path.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.skip_ready_check {
            config.skip_ready_check = true;
        }
    }
}
