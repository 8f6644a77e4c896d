//! Semantic retrieval over the chunk index.
//!
//! Embeds the query with the same model the index was built with (a
//! mismatch is a hard error), fetches k nearest chunks, drops weak
//! matches, and deduplicates by source page so one wiki article cannot
//! flood the context window with near-identical passages.

use crate::embedding::Embedder;
use crate::models::RetrievalResult;
use crate::storage::SqliteChunkIndex;
use crate::{Error, Result};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Number of query embeddings memoized between requests.
///
/// Recurring questions re-embed the same text; memoizing the vector makes
/// a cache-miss-but-repeated-query path cheaper without touching the
/// response cache's atomicity story.
const EMBEDDING_MEMO_CAPACITY: usize = 256;

/// Retrieves ranked, deduplicated context passages for a query.
pub struct Retriever {
    index: Arc<SqliteChunkIndex>,
    embedder: Arc<dyn Embedder>,
    /// Optional domain hint prepended to queries before embedding, e.g.
    /// `"Minecraft "`. Terse queries like "torch?" retrieve better with
    /// the game name in the embedding.
    query_prefix: String,
    /// Memoized query embeddings, keyed by the prefixed query text.
    embedding_memo: Mutex<LruCache<String, Vec<f32>>>,
}

impl Retriever {
    /// Creates a retriever over the given index and embedder.
    #[must_use]
    pub fn new(index: Arc<SqliteChunkIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            query_prefix: String::new(),
            embedding_memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(EMBEDDING_MEMO_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Sets the domain-hint prefix prepended to queries before embedding.
    #[must_use]
    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query_prefix = prefix.into();
        self
    }

    /// Retrieves up to `k` passages scoring at least `min_score`.
    ///
    /// Results are descending by score, at most one per source title
    /// (highest-scoring chunk wins; ties keep the earlier chunk). An
    /// empty result is a valid outcome; the caller decides how to
    /// phrase "no information found".
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleIndex`] if the index was built with a
    /// different embedding model, [`Error::EmbeddingFailed`] if the query
    /// cannot be embedded, or [`Error::OperationFailed`] on storage
    /// failures.
    #[instrument(skip(self, query))]
    pub fn retrieve(&self, query: &str, k: usize, min_score: f32) -> Result<Vec<RetrievalResult>> {
        let meta = self.index.stats()?;
        if meta.total_chunks > 0 && meta.embedding_model_id != self.embedder.model_id() {
            return Err(Error::StaleIndex {
                index_model: meta.embedding_model_id,
                embedder_model: self.embedder.model_id().to_string(),
            });
        }

        let prefixed = format!("{}{}", self.query_prefix, query);
        let query_embedding = self.embed_memoized(&prefixed)?;

        let candidates = self.index.search(&query_embedding, k)?;

        let mut seen_titles: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for (chunk, score) in candidates {
            if score < min_score {
                continue;
            }
            if !seen_titles.insert(chunk.source_title.clone()) {
                continue;
            }
            results.push(RetrievalResult { chunk, score });
        }

        tracing::debug!(
            candidates = k,
            kept = results.len(),
            "retrieval complete"
        );
        Ok(results)
    }

    /// Embeds a query, reusing a memoized vector when available.
    fn embed_memoized(&self, text: &str) -> Result<Vec<f32>> {
        {
            let mut memo = crate::storage::acquire_lock(&self.embedding_memo);
            if let Some(embedding) = memo.get(text) {
                metrics::counter!("query_embedding_memo_hits_total").increment(1);
                return Ok(embedding.clone());
            }
        }

        let embedding = self.embedder.embed(text)?;

        let mut memo = crate::storage::acquire_lock(&self.embedding_memo);
        memo.put(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}
