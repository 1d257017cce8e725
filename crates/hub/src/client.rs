//! Hub HTTP client.
//!
//! A push is one commit on `main` that adds a single file. The hub first
//! says whether the file is stored inline ("regular") or through git-lfs.
//! LFS content is uploaded to the URLs the batch API hands out, verified,
//! then referenced from the commit by its sha256 oid.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::HubError;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

const REVISION: &str = "main";
const SAMPLE_BYTES: usize = 512;
const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Kind of repository being pushed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RepoType {
    Dataset,
    Model,
}

impl RepoType {
    fn api_segment(self) -> &'static str {
        match self {
            Self::Dataset => "datasets",
            Self::Model => "models",
        }
    }

    /// Prefix used in web and git URLs. Models live at the root.
    fn url_prefix(self) -> &'static str {
        match self {
            Self::Dataset => "datasets/",
            Self::Model => "",
        }
    }
}

/// A repository on the hub.
#[derive(Debug, Clone)]
pub struct Repo {
    pub id: String,
    pub kind: RepoType,
}

/// How the hub wants a file stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: UploadMode,
    #[serde(default)]
    should_ignore: bool,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    objects: Vec<BatchObject>,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    oid: String,
    #[serde(default)]
    actions: Option<BatchActions>,
    #[serde(default)]
    error: Option<BatchObjectError>,
}

#[derive(Debug, Deserialize)]
struct BatchActions {
    upload: Option<BatchAction>,
    verify: Option<BatchAction>,
}

#[derive(Debug, Deserialize)]
struct BatchAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BatchObjectError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletedPart {
    part_number: usize,
    etag: String,
}

/// Authenticated client for one hub endpoint.
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HubClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Browser URL of `path` on `main`.
    pub fn file_url(&self, repo: &Repo, path: &str) -> String {
        format!(
            "{}/{}{}/blob/{REVISION}/{path}",
            self.endpoint,
            repo.kind.url_prefix(),
            repo.id
        )
    }

    /// Commit `content` as `path` in `repo` and return its URL.
    pub async fn upload_file(&self, repo: &Repo, path: &str, content: &[u8]) -> Result<String, HubError> {
        let mode = self.preupload(repo, path, content).await?;
        tracing::info!(repo = %repo.id, path, size = content.len(), ?mode, "Uploading file");

        let operation = match mode {
            UploadMode::Regular => json!({
                "key": "file",
                "value": {
                    "content": STANDARD.encode(content),
                    "path": path,
                    "encoding": "base64",
                },
            }),
            UploadMode::Lfs => {
                let oid = sha256_hex(content);
                self.upload_lfs(repo, &oid, content).await?;
                json!({
                    "key": "lfsFile",
                    "value": { "path": path, "algo": "sha256", "oid": oid },
                })
            }
        };
        self.commit(repo, path, operation).await?;

        Ok(self.file_url(repo, path))
    }

    // ---- private helpers ----

    fn api_url(&self, repo: &Repo, action: &str) -> String {
        format!(
            "{}/api/{}/{}/{action}/{REVISION}",
            self.endpoint,
            repo.kind.api_segment(),
            repo.id
        )
    }

    async fn preupload(&self, repo: &Repo, path: &str, content: &[u8]) -> Result<UploadMode, HubError> {
        let sample = &content[..content.len().min(SAMPLE_BYTES)];
        let body = json!({
            "files": [{
                "path": path,
                "sample": STANDARD.encode(sample),
                "size": content.len(),
            }],
        });
        let response = self
            .client
            .post(self.api_url(repo, "preupload"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let parsed: PreuploadResponse = parse_response(response).await?;

        let file = parsed
            .files
            .into_iter()
            .find(|f| f.path == path)
            .ok_or_else(|| HubError::Protocol(format!("preupload response does not mention '{path}'")))?;
        if file.should_ignore {
            return Err(HubError::Protocol(format!(
                "'{path}' is ignored by the repository's .gitignore"
            )));
        }
        Ok(file.upload_mode)
    }

    async fn upload_lfs(&self, repo: &Repo, oid: &str, content: &[u8]) -> Result<(), HubError> {
        let url = format!(
            "{}/{}{}.git/info/lfs/objects/batch",
            self.endpoint,
            repo.kind.url_prefix(),
            repo.id
        );
        let body = json!({
            "operation": "upload",
            "transfers": ["basic", "multipart"],
            "objects": [{ "oid": oid, "size": content.len() }],
            "hash_algo": "sha256",
            "ref": { "name": REVISION },
        });
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await?;
        let batch: BatchResponse = parse_response(response).await?;

        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == oid)
            .ok_or_else(|| HubError::Protocol(format!("LFS batch response does not mention {oid}")))?;
        if let Some(err) = object.error {
            return Err(HubError::Protocol(format!(
                "LFS batch rejected {oid}: {} ({})",
                err.message, err.code
            )));
        }
        let Some(actions) = object.actions else {
            tracing::info!(oid, "LFS object already present on the hub");
            return Ok(());
        };

        if let Some(upload) = actions.upload {
            match upload.header.get("chunk_size") {
                Some(chunk_size) => {
                    let chunk_size = header_usize(chunk_size)?;
                    self.upload_multipart(oid, &upload, chunk_size, content).await?;
                }
                None => {
                    let response = self
                        .client
                        .put(&upload.href)
                        .body(content.to_vec())
                        .send()
                        .await?;
                    ensure_success(response).await?;
                }
            }
        }

        if let Some(verify) = actions.verify {
            let response = self
                .client
                .post(&verify.href)
                .basic_auth("USER", Some(&self.token))
                .json(&json!({ "oid": oid, "size": content.len() }))
                .send()
                .await?;
            ensure_success(response).await?;
        }
        Ok(())
    }

    /// PUT each chunk to its presigned URL, then post the collected
    /// ETags to the completion URL.
    async fn upload_multipart(
        &self,
        oid: &str,
        upload: &BatchAction,
        chunk_size: usize,
        content: &[u8],
    ) -> Result<(), HubError> {
        if chunk_size == 0 {
            return Err(HubError::Protocol("LFS chunk_size is 0".into()));
        }
        let mut part_urls: Vec<(usize, &str)> = upload
            .header
            .iter()
            .filter_map(|(key, value)| Some((key.parse().ok()?, value.as_str()?)))
            .collect();
        part_urls.sort_by_key(|(number, _)| *number);

        let chunks: Vec<&[u8]> = content.chunks(chunk_size).collect();
        if chunks.len() != part_urls.len() {
            return Err(HubError::Protocol(format!(
                "LFS gave {} part URLs for {} chunks",
                part_urls.len(),
                chunks.len()
            )));
        }

        let mut parts = Vec::with_capacity(chunks.len());
        for (index, ((_, url), chunk)) in part_urls.iter().zip(chunks).enumerate() {
            let response = self.client.put(*url).body(chunk.to_vec()).send().await?;
            let response = ensure_success(response).await?;
            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| HubError::Protocol(format!("part {} has no ETag", index + 1)))?;
            parts.push(CompletedPart {
                part_number: index + 1,
                etag: etag.to_string(),
            });
            tracing::debug!(oid, part = index + 1, total = part_urls.len(), "LFS part uploaded");
        }

        let response = self
            .client
            .post(&upload.href)
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .json(&json!({ "oid": oid, "parts": parts }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn commit(&self, repo: &Repo, path: &str, operation: serde_json::Value) -> Result<(), HubError> {
        let header = json!({
            "key": "header",
            "value": { "summary": format!("Upload {path}"), "description": "" },
        });
        let body = format!("{header}\n{operation}");
        let response = self
            .client
            .post(self.api_url(repo, "commit"))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// SHA-256 hex digest, the LFS object id.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

fn header_usize(value: &serde_json::Value) -> Result<usize, HubError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| HubError::Protocol(format!("invalid LFS chunk_size {value}")))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, HubError> {
    let status = response.status();
    if !status.is_success() {
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(HubError::HttpStatus {
            status: status.as_u16(),
            url,
            body,
        });
    }
    Ok(response)
}

async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, HubError> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| HubError::Protocol(format!("unexpected response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Repo {
        Repo {
            id: "someone/faces".into(),
            kind: RepoType::Dataset,
        }
    }

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn dataset_urls_carry_prefix() {
        let client = HubClient::new("https://hub.test/", "t");
        assert_eq!(
            client.file_url(&dataset(), "faces.zip"),
            "https://hub.test/datasets/someone/faces/blob/main/faces.zip"
        );
        assert_eq!(
            client.api_url(&dataset(), "preupload"),
            "https://hub.test/api/datasets/someone/faces/preupload/main"
        );
    }

    #[test]
    fn model_urls_live_at_root() {
        let client = HubClient::new("https://hub.test", "t");
        let repo = Repo {
            id: "someone/lora".into(),
            kind: RepoType::Model,
        };
        assert_eq!(
            client.file_url(&repo, "w.safetensors"),
            "https://hub.test/someone/lora/blob/main/w.safetensors"
        );
        assert_eq!(
            client.api_url(&repo, "commit"),
            "https://hub.test/api/models/someone/lora/commit/main"
        );
    }

    #[test]
    fn chunk_size_accepts_string_or_number() {
        assert_eq!(header_usize(&json!("1024")).unwrap(), 1024);
        assert_eq!(header_usize(&json!(8)).unwrap(), 8);
        assert!(header_usize(&json!("lots")).is_err());
    }

    #[test]
    fn preupload_mode_parses() {
        let parsed: PreuploadResponse = serde_json::from_value(json!({
            "files": [{ "path": "a.zip", "uploadMode": "lfs", "shouldIgnore": false }]
        }))
        .unwrap();
        assert_eq!(parsed.files[0].upload_mode, UploadMode::Lfs);
    }
}
