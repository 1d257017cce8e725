use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Bad command-line input: missing file, not a directory, no source.
    #[error("{0}")]
    Validation(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Hub returned HTTP {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },

    /// The hub answered but the exchange cannot continue.
    #[error("Hub protocol error: {0}")]
    Protocol(String),
}

impl HubError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
