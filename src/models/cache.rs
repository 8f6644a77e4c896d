//! Response cache entry types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A source citation attached to a cached answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Title of the source document.
    pub title: String,
    /// URL of the source document.
    pub url: String,
}

impl SourceRef {
    /// Creates a new source reference.
    #[must_use]
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// A cached answer keyed by normalized query.
///
/// Created on the first cache miss after a successful generation. The
/// hit counter and access timestamp are updated atomically with every
/// subsequent lookup; `answer_text` changes only through an explicit
/// re-store or cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonicalized query key (see [`crate::storage::normalize_query`]).
    pub normalized_key: String,
    /// Raw phrasings observed for this key.
    pub raw_query_examples: BTreeSet<String>,
    /// The generated answer.
    pub answer_text: String,
    /// Source citations, in retrieval rank order.
    pub sources: Vec<SourceRef>,
    /// Number of lookups that found this entry.
    pub hit_count: u64,
    /// Unix timestamp of entry creation.
    pub created_at: i64,
    /// Unix timestamp of the most recent lookup or store.
    pub last_accessed_at: i64,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of distinct cached answers.
    pub entries: usize,
    /// Sum of hit counts across all entries.
    pub total_hits: u64,
}
