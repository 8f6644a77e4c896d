//! # Craftlore
//!
//! A knowledge retrieval and response cache engine for game recipe Q&A.
//!
//! Craftlore turns a corpus of scraped wiki documents into a searchable
//! embedding index, answers natural-language questions by combining
//! semantic retrieval with local text generation, and caches generated
//! answers keyed by normalized query so recurring questions never pay
//! for retrieval and generation twice.
//!
//! ## Architecture
//!
//! - Ingestion: documents are split into overlapping chunks with
//!   deterministic ids (`ingest`)
//! - Index: chunks + embeddings persisted in SQLite, cosine k-NN search
//!   (`storage::index`)
//! - Retrieval: query embedding, threshold filter, per-source dedup
//!   (`retrieval`)
//! - Prompt assembly: template substitution under a context budget
//!   (`prompt`)
//! - Response cache: normalized-key answer cache with hit accounting
//!   (`storage::cache`)
//! - Generation: pluggable backend client behind a narrow trait (`llm`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use craftlore::{AnswerEngine, CraftloreConfig};
//!
//! let engine = AnswerEngine::open(CraftloreConfig::default(), generator)?;
//! let response = engine.answer("How do I make a torch?")?;
//! println!("{} (cached: {})", response.answer_text, response.from_cache);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod storage;

// Re-exports for convenience
pub use config::CraftloreConfig;
pub use embedding::Embedder;
pub use engine::{AnswerEngine, AnswerResponse};
pub use ingest::{IngestReport, chunk_documents};
pub use llm::{GenerationClient, GenerationRequest};
pub use models::{
    CacheEntry, CacheStats, Chunk, ChunkId, Document, IndexMetadata, RetrievalResult, SourceRef,
};
pub use prompt::PromptAssembler;
pub use retrieval::Retriever;
pub use storage::{SqliteChunkIndex, SqliteResponseCache, normalize_query};

/// Error type for craftlore operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty queries, malformed document JSON, bad parameters |
/// | `EmptyDocument` | A document has no extractable text (skipped, not fatal) |
/// | `EmbeddingFailed` | Embedding backend unavailable or rejected the input |
/// | `StaleIndex` | Index was built with a different embedding model |
/// | `GenerationTimeout` | Generation backend exceeded the request timeout |
/// | `GenerationUnavailable` | Generation backend unreachable or returned an error |
/// | `Template` | Prompt template is missing required placeholders |
/// | `OperationFailed` | `SQLite` operations fail, filesystem I/O errors |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - The query string is empty after normalization
    /// - Document JSON fails to deserialize
    /// - Chunking parameters are inconsistent (overlap >= chunk size)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A document contained no extractable text.
    ///
    /// Recoverable: the ingestion batch logs and skips the document and
    /// records it in the batch [`IngestReport`].
    #[error("document '{title}' has no extractable text")]
    EmptyDocument {
        /// Title of the offending document.
        title: String,
    },

    /// Embedding computation failed.
    ///
    /// Fatal to the current ingestion batch or query. An ingestion batch
    /// that hits this error upserts nothing.
    #[error("embedding computation failed: {cause}")]
    EmbeddingFailed {
        /// The underlying cause.
        cause: String,
    },

    /// The index was built with a different embedding model.
    ///
    /// Fatal: queries against the index would compare vectors from
    /// incompatible spaces. Requires a full rebuild.
    #[error(
        "index built with model '{index_model}' but embedder is '{embedder_model}' (rebuild required)"
    )]
    StaleIndex {
        /// Model id recorded in the index metadata.
        index_model: String,
        /// Model id of the live embedder.
        embedder_model: String,
    },

    /// The generation backend exceeded its request timeout.
    ///
    /// Recoverable per-request. Nothing is written to the response cache.
    #[error("generation timed out after {elapsed_ms}ms")]
    GenerationTimeout {
        /// Elapsed time before the timeout fired.
        elapsed_ms: u64,
    },

    /// The generation backend is unreachable or returned an error.
    ///
    /// Recoverable per-request. Nothing is written to the response cache.
    #[error("generation backend unavailable: {cause}")]
    GenerationUnavailable {
        /// The underlying cause.
        cause: String,
    },

    /// The prompt template is misconfigured.
    ///
    /// Raised at assembler construction when `{context}` or `{query}`
    /// placeholders are missing. Fatal at startup so it never surfaces
    /// per-query.
    #[error("prompt template error: {reason}")]
    Template {
        /// Why the template was rejected.
        reason: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` database operations fail
    /// - Filesystem I/O errors occur
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for craftlore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized so index metadata and cache rows agree on the clock.
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
