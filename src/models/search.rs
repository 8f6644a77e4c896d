//! Retrieval result and index metadata types.

use super::Chunk;
use serde::{Deserialize, Serialize};

/// A chunk returned from similarity search, with its score.
///
/// Scores are cosine similarities clamped to `[0.0, 1.0]`, higher is more
/// relevant. Results are ordered descending by score and are never
/// persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Similarity score in `[0.0, 1.0]`.
    pub score: f32,
}

/// Metadata describing one index instance.
///
/// Used to detect staleness when the embedding model changes: a query
/// embedded with a different model than the index was built with would
/// compare vectors from incompatible spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Number of chunks currently indexed.
    pub total_chunks: usize,
    /// Identifier of the embedding model the index was built with.
    pub embedding_model_id: String,
    /// Unix timestamp of the last build or upsert.
    pub built_at: i64,
}

impl IndexMetadata {
    /// Metadata for an empty, never-built index.
    #[must_use]
    pub fn empty(embedding_model_id: impl Into<String>) -> Self {
        Self {
            total_chunks: 0,
            embedding_model_id: embedding_model_id.into(),
            built_at: 0,
        }
    }
}
