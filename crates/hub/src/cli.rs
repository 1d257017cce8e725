//! Command-line flags for `forge-hub-upload`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::client::{Repo, RepoType, DEFAULT_ENDPOINT};
use crate::upload::UploadRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

/// Push a file, or a folder zipped on the fly, to a dataset or model
/// repository.
#[derive(Debug, Parser)]
#[command(name = "forge-hub-upload", version)]
pub struct Cli {
    /// Hub access token with write permission.
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub token: String,

    /// File to upload.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Folder to zip and upload. Takes precedence over `--file`.
    #[arg(long)]
    pub path2zip: Option<PathBuf>,

    /// Delete the `--path2zip` folder after a successful upload.
    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub auto_del_path: YesNo,

    /// Target repository, `owner/name`.
    #[arg(long, alias = "repo_id")]
    pub repo_id: String,

    #[arg(long, alias = "repo_type", value_enum, default_value_t = RepoType::Dataset)]
    pub repo_type: RepoType,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

impl Cli {
    pub fn request(&self) -> UploadRequest {
        UploadRequest {
            file: self.file.clone(),
            folder: self.path2zip.clone(),
            delete_folder: self.auto_del_path == YesNo::Yes,
        }
    }

    pub fn repo(&self) -> Repo {
        Repo {
            id: self.repo_id.clone(),
            kind: self.repo_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from([
            "forge-hub-upload",
            "--token",
            "t",
            "--file",
            "a.zip",
            "--repo-id",
            "me/set",
        ])
        .unwrap();
        assert_eq!(cli.repo_type, RepoType::Dataset);
        assert_eq!(cli.auto_del_path, YesNo::No);
        assert_eq!(cli.endpoint, DEFAULT_ENDPOINT);
        assert!(!cli.request().delete_folder);
    }

    #[test]
    fn underscore_aliases_and_folder() {
        let cli = Cli::try_parse_from([
            "forge-hub-upload",
            "--token",
            "t",
            "--path2zip",
            "/data/faces",
            "--auto-del-path",
            "yes",
            "--repo_id",
            "me/lora",
            "--repo_type",
            "model",
        ])
        .unwrap();
        let request = cli.request();
        assert_eq!(request.folder, Some(PathBuf::from("/data/faces")));
        assert!(request.delete_folder);
        assert_eq!(cli.repo().kind, RepoType::Model);
        assert_eq!(cli.repo().id, "me/lora");
    }

    #[test]
    fn bad_auto_del_value_is_rejected() {
        let parsed = Cli::try_parse_from([
            "forge-hub-upload",
            "--token",
            "t",
            "--file",
            "a",
            "--repo-id",
            "me/set",
            "--auto-del-path",
            "maybe",
        ]);
        assert!(parsed.is_err());
    }
}
