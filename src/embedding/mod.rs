//! Embedding generation.
//!
//! Provides embedding generation using fastembed, with a deterministic
//! hash-based fallback when the `fastembed-embeddings` feature is off.

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

mod fastembed;

pub use fastembed::{FastEmbedEmbedder, cosine_similarity};

use crate::Result;

/// Default embedding dimensions (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators.
///
/// The `model_id` is persisted in the index metadata and compared at
/// query time; a mismatch means the index must be rebuilt.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Returns a stable identifier for the model/version in use.
    fn model_id(&self) -> &str;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
