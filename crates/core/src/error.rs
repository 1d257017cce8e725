use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Workflow node not found: no '{class_type}' node with a '{input}' input")]
    MissingNode {
        class_type: &'static str,
        input: &'static str,
    },

    #[error("Invalid workflow JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Compression error: {0}")]
    Compression(std::io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PNG encoding error: {0}")]
    PngEncoding(#[from] png::EncodingError),
}

impl CoreError {
    /// Attach the offending path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
