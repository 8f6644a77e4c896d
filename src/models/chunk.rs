//! Document and chunk types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// An input document as delivered by the external scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Page title.
    pub title: String,
    /// Canonical source URL.
    pub url: String,
    /// Extracted plain text.
    pub text: String,
}

impl Document {
    /// Creates a new document.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            text: text.into(),
        }
    }
}

/// Unique identifier for a chunk.
///
/// Derived deterministically from `(source_title, chunk_index)` so that
/// re-ingesting unchanged documents produces identical ids, which is what
/// makes full rebuilds idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Derives the id for a chunk of the given document.
    #[must_use]
    pub fn derive(source_title: &str, chunk_index: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_title.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk_index.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A bounded span of source text stored with its embedding for retrieval.
///
/// Chunks are created during ingestion, immutable once written, and
/// destroyed only on a full index reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier (see [`ChunkId::derive`]).
    pub id: ChunkId,
    /// The chunk text.
    pub text: String,
    /// Title of the source document.
    pub source_title: String,
    /// URL of the source document.
    pub source_url: String,
    /// Position of this chunk within its document.
    pub chunk_index: usize,
    /// Embedding vector, present once the index has computed it.
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Creates a chunk for the given document slice, deriving its id.
    #[must_use]
    pub fn new(doc: &Document, chunk_index: usize, text: impl Into<String>) -> Self {
        Self {
            id: ChunkId::derive(&doc.title, chunk_index),
            text: text.into(),
            source_title: doc.title.clone(),
            source_url: doc.url.clone(),
            chunk_index,
            embedding: None,
        }
    }
}
