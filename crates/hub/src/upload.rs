//! One upload run: resolve the source, push it, clean up.

use std::path::{Path, PathBuf};

use crate::archive::zip_folder;
use crate::client::{HubClient, Repo};
use crate::error::HubError;

/// What to push. A folder takes precedence over a file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: Option<PathBuf>,
    pub folder: Option<PathBuf>,
    /// Remove `folder` after a successful push.
    pub delete_folder: bool,
}

/// A file ready to push, plus what to remove afterwards.
#[derive(Debug)]
pub struct PreparedUpload {
    file: PathBuf,
    temporary_zip: bool,
    folder_to_delete: Option<PathBuf>,
}

impl PreparedUpload {
    /// Validate the request, archiving the folder when one is given.
    pub fn prepare(request: &UploadRequest) -> Result<Self, HubError> {
        if let Some(folder) = &request.folder {
            if !folder.is_dir() {
                return Err(HubError::Validation(format!(
                    "{} is not a directory",
                    folder.display()
                )));
            }
            let file = zip_folder(folder)?;
            return Ok(Self {
                file,
                temporary_zip: true,
                folder_to_delete: request.delete_folder.then(|| folder.clone()),
            });
        }

        match &request.file {
            Some(file) if file.is_file() => Ok(Self {
                file: file.clone(),
                temporary_zip: false,
                folder_to_delete: None,
            }),
            Some(file) => Err(HubError::Validation(format!(
                "file {} does not exist",
                file.display()
            ))),
            None => Err(HubError::Validation(
                "either --file or --path2zip is required".into(),
            )),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Name the file gets in the repository.
    pub fn repo_path(&self) -> Result<String, HubError> {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| HubError::Validation(format!("{} has no file name", self.file.display())))
    }

    /// Remove the temporary zip, and the source folder when asked to and
    /// the push went through. Failures are logged only.
    pub fn cleanup(self, pushed: bool) {
        if self.temporary_zip {
            match std::fs::remove_file(&self.file) {
                Ok(()) => tracing::info!(path = %self.file.display(), "Temporary archive removed"),
                Err(e) => tracing::warn!(path = %self.file.display(), error = %e, "Failed to remove temporary archive"),
            }
        }
        if let (true, Some(folder)) = (pushed, self.folder_to_delete) {
            match std::fs::remove_dir_all(&folder) {
                Ok(()) => tracing::info!(path = %folder.display(), "Source folder removed"),
                Err(e) => tracing::warn!(path = %folder.display(), error = %e, "Failed to remove source folder"),
            }
        }
    }
}

/// Push a prepared file and return its URL on the hub.
pub async fn push(client: &HubClient, repo: &Repo, prepared: &PreparedUpload) -> Result<String, HubError> {
    let path = prepared.repo_path()?;
    let content = tokio::fs::read(prepared.file())
        .await
        .map_err(|e| HubError::io(prepared.file(), e))?;
    client.upload_file(repo, &path, &content).await
}
