//! Property-based tests for normalization, chunking, and prompt assembly.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Query normalization is idempotent and case-insensitive
//! - Chunk ids are deterministic functions of (title, index)
//! - Chunking is deterministic and never cuts words
//! - Assembled context never exceeds its character budget

#![allow(clippy::expect_used, clippy::unwrap_used)]

use craftlore::models::{Chunk, ChunkId, Document, RetrievalResult};
use craftlore::{PromptAssembler, chunk_documents, normalize_query};
use proptest::prelude::*;

fn retrieval_result(title: &str, text: &str) -> RetrievalResult {
    RetrievalResult {
        chunk: Chunk {
            id: ChunkId::derive(title, 0),
            text: text.to_string(),
            source_title: title.to_string(),
            source_url: format!("https://wiki/{title}"),
            chunk_index: 0,
            embedding: None,
        },
        score: 0.5,
    }
}

proptest! {
    /// Property: normalization is idempotent for arbitrary input.
    #[test]
    fn prop_normalize_idempotent(raw in "\\PC{0,120}") {
        let once = normalize_query(&raw);
        prop_assert_eq!(normalize_query(&once), once);
    }

    /// Property: ASCII case variants normalize to the same key.
    #[test]
    fn prop_normalize_case_insensitive(raw in "[ -~]{0,80}") {
        prop_assert_eq!(
            normalize_query(&raw.to_uppercase()),
            normalize_query(&raw.to_lowercase())
        );
    }

    /// Property: normalized keys never carry edge whitespace or
    /// collapsed-out interior runs.
    #[test]
    fn prop_normalize_whitespace_canonical(raw in "[ -~]{0,80}") {
        let key = normalize_query(&raw);
        prop_assert_eq!(key.trim(), key.as_str());
        prop_assert!(!key.contains("  "));
    }

    /// Property: chunk ids are pure functions of (title, index).
    #[test]
    fn prop_chunk_id_deterministic(title in "[a-zA-Z0-9 _-]{1,40}", index in 0usize..1000) {
        prop_assert_eq!(ChunkId::derive(&title, index), ChunkId::derive(&title, index));
    }

    /// Property: different indices yield different ids for a title.
    #[test]
    fn prop_chunk_id_index_sensitive(title in "[a-zA-Z0-9]{1,40}", index in 0usize..999) {
        prop_assert_ne!(ChunkId::derive(&title, index), ChunkId::derive(&title, index + 1));
    }

    /// Property: chunking the same document twice gives identical chunks.
    #[test]
    fn prop_chunking_deterministic(words in proptest::collection::vec("[a-z]{1,12}", 0..300)) {
        let text = words.join(" ");
        let docs = vec![Document::new("Page", "https://wiki/Page", text)];

        let (a, report_a) = chunk_documents(&docs, 200, 40).unwrap();
        let (b, report_b) = chunk_documents(&docs, 200, 40).unwrap();

        prop_assert_eq!(report_a, report_b);
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert_eq!(&x.id, &y.id);
            prop_assert_eq!(&x.text, &y.text);
        }
    }

    /// Property: every chunked word appears in the source text whole.
    #[test]
    fn prop_chunking_never_cuts_words(words in proptest::collection::vec("[a-z]{1,12}", 1..200)) {
        let text = words.join(" ");
        let docs = vec![Document::new("Page", "https://wiki/Page", text.clone())];

        let (chunks, _) = chunk_documents(&docs, 100, 20).unwrap();
        for chunk in &chunks {
            for word in chunk.text.split_whitespace() {
                prop_assert!(
                    words.iter().any(|w| w == word),
                    "word {:?} was cut from source",
                    word
                );
            }
        }
    }

    /// Property: the assembled context never exceeds its budget, no
    /// matter how oversized the passages are.
    #[test]
    fn prop_context_within_budget(
        budget in 300usize..2000,
        passages in proptest::collection::vec("[a-z ]{10,800}", 0..6)
    ) {
        let assembler = PromptAssembler::new("<<{context}>>{query}", budget).unwrap();
        let results: Vec<RetrievalResult> = passages
            .iter()
            .enumerate()
            .map(|(i, text)| retrieval_result(&format!("Page{i}"), text))
            .collect();

        let prompt = assembler.assemble("query", &results);
        let start = prompt.find("<<").unwrap() + 2;
        let end = prompt.rfind(">>").unwrap();
        let context = &prompt[start..end];

        prop_assert!(
            context.chars().count() <= budget,
            "context {} chars exceeds budget {}",
            context.chars().count(),
            budget
        );
    }
}
