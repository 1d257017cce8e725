//! Compressed base64 transport encoding.
//!
//! Workflows and HD result images cross the wire as zlib-compressed bytes
//! wrapped in standard base64. Plain base64 is used for standard-path
//! image uploads.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::CoreError;
use crate::workflow::WorkflowDocument;

/// Base64-encode raw bytes.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// zlib-compress then base64-encode.
pub fn compress_b64(bytes: &[u8]) -> Result<String, CoreError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(CoreError::Compression)?;
    let compressed = encoder.finish().map_err(CoreError::Compression)?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`compress_b64`]. Surrounding whitespace is ignored.
pub fn decompress_b64(encoded: &str) -> Result<Vec<u8>, CoreError> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut out = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(CoreError::Compression)?;
    Ok(out)
}

/// Encode a workflow into its compressed transport string.
pub fn encode_workflow(doc: &WorkflowDocument) -> Result<String, CoreError> {
    let json = serde_json::to_vec(doc)?;
    compress_b64(&json)
}

/// Decode a compressed transport string into a workflow.
pub fn decode_workflow(encoded: &str) -> Result<WorkflowDocument, CoreError> {
    let json = decompress_b64(encoded)?;
    WorkflowDocument::from_slice(&json)
}
