//! FastEmbed-based embedder.
//!
//! Provides semantic embeddings using the all-MiniLM-L6-v2 model via
//! fastembed-rs. When the `fastembed-embeddings` feature is enabled, this
//! uses real ONNX-based semantic embeddings. Otherwise, falls back to
//! deterministic hash-based pseudo-embeddings.

use super::{DEFAULT_DIMENSIONS, Embedder};
use crate::{Error, Result};

// ============================================================================
// Native FastEmbed Implementation (with feature)
// ============================================================================

#[cfg(feature = "fastembed-embeddings")]
mod native {
    use super::{DEFAULT_DIMENSIONS, Embedder, Error, Result};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::OnceLock;
    use std::time::Instant;

    /// Thread-safe singleton for the embedding model.
    /// Uses `OnceLock` for lazy initialization on first use.
    static EMBEDDING_MODEL: OnceLock<fastembed::TextEmbedding> = OnceLock::new();

    /// `FastEmbed` embedder using all-MiniLM-L6-v2.
    ///
    /// The model is lazily loaded on first embed call to preserve cold
    /// start time; the first call blocks (~100-500ms) while the ONNX model
    /// loads.
    pub struct FastEmbedEmbedder {
        /// Model name, persisted in index metadata for staleness checks.
        model_name: &'static str,
    }

    impl FastEmbedEmbedder {
        /// Default embedding dimensions for all-MiniLM-L6-v2.
        pub const DEFAULT_DIMENSIONS: usize = DEFAULT_DIMENSIONS;

        /// Creates a new `FastEmbed` embedder.
        ///
        /// Note: Model is lazily loaded on first `embed()` call.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                model_name: "all-MiniLM-L6-v2",
            }
        }

        /// Gets or initializes the embedding model (thread-safe).
        fn get_model() -> Result<&'static fastembed::TextEmbedding> {
            if let Some(model) = EMBEDDING_MODEL.get() {
                return Ok(model);
            }

            tracing::info!("Loading embedding model (first use)...");
            let start = Instant::now();

            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false);

            let model =
                fastembed::TextEmbedding::try_new(options).map_err(|e| Error::EmbeddingFailed {
                    cause: format!("failed to load model: {e}"),
                })?;

            tracing::info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                model = "all-MiniLM-L6-v2",
                "Embedding model loaded successfully"
            );

            // Store the model, ignoring if another thread beat us to it
            let _ = EMBEDDING_MODEL.set(model);
            EMBEDDING_MODEL.get().ok_or_else(|| Error::EmbeddingFailed {
                cause: "model initialization race condition".to_string(),
            })
        }
    }

    impl Default for FastEmbedEmbedder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimensions(&self) -> usize {
            Self::DEFAULT_DIMENSIONS
        }

        fn model_id(&self) -> &str {
            self.model_name
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.is_empty() {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }

            let model = Self::get_model()?;
            let text_owned = text.to_string();

            // ONNX runtime can panic on malformed inputs; contain it so one
            // bad chunk cannot take the process down. AssertUnwindSafe is
            // fine because no mutable state is touched after the panic.
            let result = catch_unwind(AssertUnwindSafe(|| model.embed(vec![text_owned], None)));

            let embeddings = result
                .map_err(|panic_info| {
                    let panic_msg = panic_info
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic_info.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        panic_message = %panic_msg,
                        "ONNX runtime panicked during embedding"
                    );
                    Error::EmbeddingFailed {
                        cause: format!("ONNX runtime panic: {panic_msg}"),
                    }
                })?
                .map_err(|e| Error::EmbeddingFailed {
                    cause: e.to_string(),
                })?;

            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| Error::EmbeddingFailed {
                    cause: "no embedding returned from model".to_string(),
                })
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            if texts.iter().any(|t| t.is_empty()) {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }

            let model = Self::get_model()?;
            let texts_owned: Vec<String> = texts.iter().map(|s| (*s).to_string()).collect();

            let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts_owned, None)));

            result
                .map_err(|panic_info| {
                    let panic_msg = panic_info
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic_info.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        panic_message = %panic_msg,
                        batch_size = texts.len(),
                        "ONNX runtime panicked during batch embedding"
                    );
                    Error::EmbeddingFailed {
                        cause: format!("ONNX runtime panic: {panic_msg}"),
                    }
                })?
                .map_err(|e| Error::EmbeddingFailed {
                    cause: e.to_string(),
                })
        }
    }
}

// ============================================================================
// Fallback Implementation (without feature)
// ============================================================================

#[cfg(not(feature = "fastembed-embeddings"))]
mod fallback {
    use super::{DEFAULT_DIMENSIONS, Embedder, Error, Result};
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    /// Hash-based pseudo-embedder.
    ///
    /// Generates deterministic pseudo-embeddings from word tokens and
    /// character trigrams. Token overlap (including prefix overlap like
    /// "torch"/"torches") produces nonzero similarity, which is enough for
    /// tests and for keyword-heavy recipe queries; it does NOT capture
    /// true semantic similarity. For production use, enable the
    /// `fastembed-embeddings` feature.
    pub struct FastEmbedEmbedder {
        /// Embedding dimensions.
        dimensions: usize,
    }

    impl FastEmbedEmbedder {
        /// Default embedding dimensions, matching all-MiniLM-L6-v2.
        pub const DEFAULT_DIMENSIONS: usize = DEFAULT_DIMENSIONS;

        /// Creates a new pseudo-embedder.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                dimensions: Self::DEFAULT_DIMENSIONS,
            }
        }

        /// Creates a pseudo-embedder with custom dimensions.
        #[must_use]
        pub const fn with_dimensions(dimensions: usize) -> Self {
            Self { dimensions }
        }

        /// Generates a deterministic pseudo-embedding from text.
        #[allow(clippy::cast_precision_loss)]
        #[allow(clippy::cast_possible_truncation)]
        fn pseudo_embed(&self, text: &str) -> Vec<f32> {
            // Bound iteration to keep very long chunks cheap
            const MAX_TOKENS: usize = 2000;
            let mut embedding = vec![0.0f32; self.dimensions];

            let lowered = text.to_lowercase();
            let mut budget = MAX_TOKENS;

            for word in lowered
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
            {
                if budget == 0 {
                    break;
                }
                budget -= 1;
                Self::accumulate(&mut embedding, word, 1.0);

                // Character trigrams give partial credit for inflected
                // forms ("torch" vs "torches")
                let bytes = word.as_bytes();
                if bytes.len() > 3 {
                    for win in bytes.windows(3) {
                        if budget == 0 {
                            break;
                        }
                        budget -= 1;
                        Self::accumulate_bytes(&mut embedding, win, 0.5);
                    }
                }
            }

            Self::normalize(&mut embedding);
            embedding
        }

        /// Adds a token's hash signature into the embedding.
        fn accumulate(embedding: &mut [f32], token: &str, weight: f32) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            Self::distribute(embedding, hasher.finish(), weight);
        }

        /// Adds a byte window's hash signature into the embedding.
        fn accumulate_bytes(embedding: &mut [f32], window: &[u8], weight: f32) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            Self::distribute(embedding, hasher.finish(), weight);
        }

        /// Spreads a hash across a handful of dimensions with signed values.
        #[allow(clippy::cast_precision_loss)]
        #[allow(clippy::cast_possible_truncation)]
        fn distribute(embedding: &mut [f32], hash: u64, weight: f32) {
            let dims = embedding.len();
            for j in 0..4 {
                let idx = ((hash >> (j * 16)) as usize) % dims;
                let sign = if (hash >> (60 - j)) & 1 == 0 { 1.0 } else { -1.0 };
                embedding[idx] += sign * weight;
            }
        }

        /// Normalizes an embedding vector in-place.
        fn normalize(embedding: &mut [f32]) {
            let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
            if norm_sq <= 0.0 {
                return;
            }
            let inv_norm = norm_sq.sqrt().recip();
            for v in embedding.iter_mut() {
                *v *= inv_norm;
            }
        }
    }

    impl Default for FastEmbedEmbedder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn model_id(&self) -> &str {
            "pseudo-hash-v1"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.is_empty() {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }

            tracing::debug!(
                "Using pseudo-embedding fallback (fastembed-embeddings feature not enabled)"
            );
            Ok(self.pseudo_embed(text))
        }
    }
}

// ============================================================================
// Public Re-exports
// ============================================================================

#[cfg(feature = "fastembed-embeddings")]
pub use native::FastEmbedEmbedder;

#[cfg(not(feature = "fastembed-embeddings"))]
pub use fallback::FastEmbedEmbedder;

// ============================================================================
// Utility Functions
// ============================================================================

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or 0.0 if the vectors are empty or of
/// mismatched length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
