//! Background result uploads.
//!
//! Each finished job spawns one upload task into an [`UploadQueue`]. At
//! most `concurrency` uploads run at once; the rest wait for a permit.
//! Failures are logged and counted, never retried. [`UploadQueue::drain`]
//! waits for every spawned task before the process exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use forge_core::error::CoreError;
use forge_core::transport::{compress_b64, encode_b64};

use crate::coordinator::{CoordinatorClient, CoordinatorError, ImagePairUpload, ImageUpload};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Encode(#[from] CoreError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// A standard-pipeline result waiting to be sent.
#[derive(Debug, Clone)]
pub struct ImageUploadJob {
    pub job_id: String,
    pub sequence_number: String,
    pub filename: String,
    pub path: PathBuf,
}

/// A high-resolution-pipeline result waiting to be sent.
#[derive(Debug, Clone)]
pub struct PairUploadJob {
    pub job_id: String,
    pub prefix: String,
    pub sd_path: PathBuf,
    pub hd_path: Option<PathBuf>,
}

/// Totals reported by [`UploadQueue::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub spawned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Bounded set of in-flight upload tasks.
pub struct UploadQueue {
    coordinator: CoordinatorClient,
    permits: Arc<Semaphore>,
    tasks: JoinSet<bool>,
    summary: UploadSummary,
}

impl UploadQueue {
    pub fn new(coordinator: CoordinatorClient, concurrency: usize) -> Self {
        Self {
            coordinator,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            summary: UploadSummary::default(),
        }
    }

    /// Number of uploads spawned so far.
    pub fn spawned(&self) -> usize {
        self.summary.spawned
    }

    pub fn spawn_image(&mut self, job: ImageUploadJob) {
        let coordinator = self.coordinator.clone();
        let permits = self.permits.clone();
        self.summary.spawned += 1;
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return false;
            };
            match send_image(&coordinator, &job).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.job_id, filename = %job.filename, "Upload delivered");
                    true
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, filename = %job.filename, error = %e, "Upload failed");
                    false
                }
            }
        });
    }

    pub fn spawn_pair(&mut self, job: PairUploadJob) {
        let coordinator = self.coordinator.clone();
        let permits = self.permits.clone();
        self.summary.spawned += 1;
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return false;
            };
            match send_pair(&coordinator, &job).await {
                Ok(()) => {
                    tracing::info!(
                        job_id = %job.job_id,
                        sd = %job.sd_path.display(),
                        hd = ?job.hd_path.as_ref().map(|p| p.display().to_string()),
                        "SD+HD upload delivered",
                    );
                    true
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, prefix = %job.prefix, error = %e, "SD+HD upload failed");
                    false
                }
            }
        });
    }

    /// Wait for every spawned upload to finish.
    pub async fn drain(mut self) -> UploadSummary {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(true) => self.summary.succeeded += 1,
                Ok(false) => self.summary.failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Upload task panicked");
                    self.summary.failed += 1;
                }
            }
        }
        self.summary
    }
}

async fn send_image(coordinator: &CoordinatorClient, job: &ImageUploadJob) -> Result<(), UploadError> {
    let bytes = read(&job.path).await?;
    let upload = ImageUpload {
        nomor: job.sequence_number.clone(),
        worker_id: coordinator.worker_id().to_string(),
        job_id: job.job_id.clone(),
        filename: job.filename.clone(),
        image_base64: encode_b64(&bytes),
    };
    coordinator.upload_image(&upload).await?;
    Ok(())
}

async fn send_pair(coordinator: &CoordinatorClient, job: &PairUploadJob) -> Result<(), UploadError> {
    let sd_base64 = compress_b64(&read(&job.sd_path).await?)?;
    let hd_base64 = match &job.hd_path {
        Some(path) if path.exists() => Some(compress_b64(&read(path).await?)?),
        _ => None,
    };
    let upload = ImagePairUpload {
        worker_id: coordinator.worker_id().to_string(),
        job_id: job.job_id.clone(),
        filename: job.prefix.clone(),
        sd_base64,
        hd_base64,
    };
    coordinator.upload_image_pair(&upload).await?;
    Ok(())
}

async fn read(path: &Path) -> Result<Vec<u8>, CoreError> {
    tokio::fs::read(path).await.map_err(|e| CoreError::io(path, e))
}
