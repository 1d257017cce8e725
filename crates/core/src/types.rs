use indexmap::IndexMap;

/// Images produced by one prompt: backend node ID to raw image blobs, in
/// the order the backend reported them.
pub type GenerationResult = IndexMap<String, Vec<Vec<u8>>>;

/// Total number of blobs across all nodes.
pub fn image_count(result: &GenerationResult) -> usize {
    result.values().map(Vec::len).sum()
}
