//! Job loop: poll, generate, save, upload, drain, terminate.
//!
//! Jobs run strictly one at a time. Only uploads overlap with the next
//! job. A failed poll (transport error, non-2xx, unknown status) ends the
//! loop, and so does a job failure that would repeat for every later job:
//! an unreachable backend or an unusable template. Other job failures
//! (an empty result, an undecodable image, a missing payload field) are
//! logged and the loop polls again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use forge_comfyui::generator::{GeneratorError, ImageBackend};
use forge_core::error::CoreError;
use forge_core::imaging::{
    convert_to_jpeg_and_remove, longest_side, save_png, save_png_with_workflow, select_hd_sd,
};
use forge_core::job::{Job, JobPoll};
use forge_core::transport::decode_workflow;
use forge_core::types::{image_count, GenerationResult};
use forge_core::workflow::{PromptKind, Resolution, WorkflowDocument};

use crate::config::WorkerConfig;
use crate::coordinator::{CoordinatorClient, CoordinatorError};
use crate::termination::ComputeProvider;
use crate::uploader::{ImageUploadJob, PairUploadJob, UploadQueue, UploadSummary};

/// Which loop the coordination server asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Standard,
    HighResolution,
}

/// Why the job loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The server reported no more work.
    Drained,
    /// Polling failed; the message says how.
    PollFailed(String),
    /// The pipeline mode could not be determined; no jobs were run.
    ModeUnavailable,
    /// The generation backend rejected or never received a prompt.
    BackendFailed(String),
    /// The workflow template cannot be prepared for any job.
    TemplateUnusable(String),
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub mode: Option<PipelineMode>,
    pub stop_reason: StopReason,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub uploads: UploadSummary,
}

/// Setup failures that abort the run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Failed to download workflow template: {0}")]
    Template(#[source] CoordinatorError),
}

/// Failures confined to a single job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("Workflow template unusable: {0}")]
    Template(#[source] CoreError),

    #[error("Job is missing '{0}'")]
    MissingField(&'static str),
}

impl JobError {
    /// The stop reason for failures that every following job would hit
    /// too, `None` for failures confined to this job.
    fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Self::Generator(e) => Some(StopReason::BackendFailed(e.to_string())),
            Self::Template(e) => Some(StopReason::TemplateUnusable(e.to_string())),
            Self::Core(_) | Self::MissingField(_) => None,
        }
    }
}

/// Drives the worker from the first poll to self-termination.
pub struct Orchestrator<B> {
    config: Arc<WorkerConfig>,
    coordinator: CoordinatorClient,
    backend: B,
    uploads: UploadQueue,
    jobs_completed: usize,
    jobs_failed: usize,
}

impl<B: ImageBackend> Orchestrator<B> {
    pub fn new(config: Arc<WorkerConfig>, backend: B) -> Self {
        let coordinator =
            CoordinatorClient::new(config.coordinator_url.clone(), config.identity.as_str());
        let uploads = UploadQueue::new(coordinator.clone(), config.upload_concurrency);
        Self {
            config,
            coordinator,
            backend,
            uploads,
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    /// Select the pipeline, process jobs until the server runs dry, wait
    /// for uploads, then destroy the instance when running on rented
    /// compute.
    pub async fn run(mut self) -> Result<RunSummary, OrchestratorError> {
        let mode = match self.coordinator.generate_type().await {
            Ok(true) => PipelineMode::HighResolution,
            Ok(false) => PipelineMode::Standard,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query pipeline mode");
                return Ok(RunSummary {
                    mode: None,
                    stop_reason: StopReason::ModeUnavailable,
                    jobs_completed: 0,
                    jobs_failed: 0,
                    uploads: UploadSummary::default(),
                });
            }
        };
        tracing::info!(?mode, worker_id = %self.config.identity, "Pipeline selected");

        if mode == PipelineMode::Standard {
            self.ensure_template().await?;
        }

        let stop_reason = self.job_loop(mode).await;

        let Self {
            config,
            uploads,
            jobs_completed,
            jobs_failed,
            ..
        } = self;
        let uploads = uploads.drain().await;

        tracing::info!(
            ?stop_reason,
            jobs_completed,
            jobs_failed,
            uploads_spawned = uploads.spawned,
            uploads_failed = uploads.failed,
            "No more jobs, worker finished",
        );

        terminate_if_rented(&config).await;

        Ok(RunSummary {
            mode: Some(mode),
            stop_reason,
            jobs_completed,
            jobs_failed,
            uploads,
        })
    }

    async fn ensure_template(&self) -> Result<(), OrchestratorError> {
        let path = &self.config.workflow_file;
        if path.exists() {
            return Ok(());
        }
        tracing::info!(path = %path.display(), "Requesting workflow template");
        self.coordinator
            .fetch_workflow(path)
            .await
            .map_err(OrchestratorError::Template)
    }

    async fn job_loop(&mut self, mode: PipelineMode) -> StopReason {
        loop {
            tracing::info!("Requesting job from server");
            let (job, workflow) = match self.coordinator.poll_job().await {
                Ok(JobPoll::Empty) => return StopReason::Drained,
                Ok(JobPoll::Assigned { job, workflow }) => (job, workflow),
                Ok(JobPoll::Unknown(status)) => {
                    tracing::error!(?status, "Unrecognised job status");
                    return StopReason::PollFailed(format!("unrecognised status {status:?}"));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Job request failed");
                    return StopReason::PollFailed(e.to_string());
                }
            };

            let outcome = match mode {
                PipelineMode::Standard => self.process_standard(&job).await,
                PipelineMode::HighResolution => self.process_high_resolution(&job, workflow).await,
            };
            match outcome {
                Ok(true) => self.jobs_completed += 1,
                Ok(false) => self.jobs_failed += 1,
                Err(e) => {
                    self.jobs_failed += 1;
                    if let Some(reason) = e.stop_reason() {
                        tracing::error!(job_id = %job.job_id, error = %e, "Job failed, stopping");
                        return reason;
                    }
                    tracing::error!(job_id = %job.job_id, error = %e, "Job failed");
                }
            }
        }
    }

    /// Standard pipeline. `Ok(false)` when the backend produced nothing.
    async fn process_standard(&mut self, job: &Job) -> Result<bool, JobError> {
        tracing::info!(
            job_id = %job.job_id,
            number = %job.sequence_number,
            prompt = %job.short_prompt(),
            character = %job.character_name,
            seed = ?job.seed,
            "Job received",
        );

        let folder = self.config.output_dir.join(&job.character_name);
        create_dir(&folder)?;

        let mut workflow =
            WorkflowDocument::load(&self.config.workflow_file).map_err(JobError::Template)?;
        match job.seed {
            Some(seed) => workflow.set_seed(seed).map_err(JobError::Template)?,
            None => tracing::warn!(job_id = %job.job_id, "Job has no seed, keeping template seed"),
        }
        if !workflow.set_prompt(PromptKind::Positive, &job.prompt_text) {
            tracing::warn!(job_id = %job.job_id, "Workflow has no positive prompt node");
        }

        let Some(images) = self.generate(job, &workflow).await? else {
            return Ok(false);
        };
        let Some(first) = images.values().flatten().next() else {
            return Ok(false);
        };

        let filename = format!("{}_{}.png", job.character_name, job.sequence_number);
        let path = folder.join(&filename);
        save_png_with_workflow(first, &path, &workflow.to_canonical_json()?)?;
        tracing::info!(job_id = %job.job_id, path = %path.display(), "Image saved");

        self.uploads.spawn_image(ImageUploadJob {
            job_id: job.job_id.clone(),
            sequence_number: job.sequence_number.clone(),
            filename,
            path,
        });
        Ok(true)
    }

    /// High-resolution pipeline. `Ok(false)` when nothing could be saved.
    async fn process_high_resolution(
        &mut self,
        job: &Job,
        encoded: Option<String>,
    ) -> Result<bool, JobError> {
        let encoded = encoded.ok_or(JobError::MissingField("WORKFLOW"))?;
        let prefix = job.file_prefix().ok_or(JobError::MissingField("png_file"))?;
        tracing::info!(
            job_id = %job.job_id,
            number = %job.sequence_number,
            source = ?job.target_png_path,
            prefix = %prefix,
            "HD job received",
        );

        let mut workflow = decode_workflow(&encoded)?;
        workflow.apply_resolution(Resolution::High);

        let Some(images) = self.generate(job, &workflow).await? else {
            return Ok(false);
        };

        let out = &self.config.output_dir;
        create_dir(out)?;
        let saved = save_all_png(&images, out, &prefix);

        let sd_folder = out.join("sd");
        let hd_folder = out.join("hd");
        create_dir(&sd_folder)?;
        create_dir(&hd_folder)?;
        let sd_path = sd_folder.join(format!("{prefix}_SD.jpg"));
        let hd_path = hd_folder.join(format!("{prefix}_HD.jpg"));

        let hd_path = match saved.as_slice() {
            [] => {
                tracing::error!(job_id = %job.job_id, "No images could be saved");
                return Ok(false);
            }
            [only] => {
                convert_to_jpeg_and_remove(only, &sd_path)?;
                None
            }
            [first, second, ..] => {
                let pair = select_hd_sd(
                    (first, longest_side(first)?),
                    (second, longest_side(second)?),
                );
                convert_to_jpeg_and_remove(pair.sd, &sd_path)?;
                convert_to_jpeg_and_remove(pair.hd, &hd_path)?;
                Some(hd_path)
            }
        };
        tracing::info!(
            job_id = %job.job_id,
            sd = %sd_path.display(),
            hd = ?hd_path.as_ref().map(|p| p.display().to_string()),
            "HD/SD images saved",
        );

        self.uploads.spawn_pair(PairUploadJob {
            job_id: job.job_id.clone(),
            prefix,
            sd_path,
            hd_path,
        });
        Ok(true)
    }

    async fn generate(
        &mut self,
        job: &Job,
        workflow: &WorkflowDocument,
    ) -> Result<Option<GenerationResult>, JobError> {
        match self.backend.run_prompt(workflow).await? {
            Some(images) if image_count(&images) > 0 => Ok(Some(images)),
            _ => {
                tracing::error!(job_id = %job.job_id, "No images generated");
                Ok(None)
            }
        }
    }
}

/// Delete a leftover workflow template so the run starts from a fresh
/// download. Logged either way.
pub fn remove_stale_workflow(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "Removed cached workflow template"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No cached workflow template to remove");
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove cached workflow template");
        }
    }
}

/// Save every blob as `<prefix>_<node>_<uuid>_<n>.png` under `dir`.
/// Undecodable blobs are logged and skipped.
fn save_all_png(images: &GenerationResult, dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut saved = Vec::new();
    for (node_id, blobs) in images {
        for (index, bytes) in blobs.iter().enumerate() {
            let name = format!(
                "{prefix}_{node_id}_{}_{}.png",
                uuid::Uuid::new_v4().simple(),
                index + 1
            );
            let path = dir.join(name);
            match save_png(bytes, &path) {
                Ok(()) => saved.push(path),
                Err(e) => tracing::error!(node_id = %node_id, error = %e, "Failed to save image"),
            }
        }
    }
    saved
}

fn create_dir(path: &Path) -> Result<(), CoreError> {
    std::fs::create_dir_all(path).map_err(|e| CoreError::io(path, e))
}

async fn terminate_if_rented(config: &WorkerConfig) {
    let Some(instance_id) = config.identity.instance_id() else {
        return;
    };
    let provider = ComputeProvider::new(config.vastai_api_url.clone(), config.vastai_api_key.clone());
    match provider.destroy_instance(instance_id).await {
        Ok(()) => tracing::info!(instance_id, "Instance destroyed"),
        Err(e) => tracing::error!(instance_id, error = %e, "Failed to destroy instance"),
    }
}
