//! Benchmarks for index search and query normalization.
//!
//! Benchmark targets:
//! - 100 chunks: <5ms per search
//! - 1,000 chunks: <20ms per search
//! - 5,000 chunks: <80ms per search
//!
//! Search here is the full retrieval path: query embedding, cosine scan
//! over the stored vectors, threshold filter, and per-source dedup.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::print_stderr)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;

use craftlore::embedding::FastEmbedEmbedder;
use craftlore::models::Document;
use craftlore::storage::SqliteChunkIndex;
use craftlore::{Embedder, Retriever, chunk_documents, normalize_query};

/// Builds an in-memory index over `n` synthetic wiki pages.
fn build_retriever(n: usize) -> Retriever {
    let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedEmbedder::new());
    let index =
        Arc::new(SqliteChunkIndex::in_memory(Arc::clone(&embedder)).expect("create index"));

    let docs: Vec<Document> = (0..n)
        .map(|i| {
            Document::new(
                format!("Page {i}"),
                format!("https://wiki/Page_{i}"),
                format!(
                    "Item {i} is crafted from {} ore and {} planks. \
                     Smelt the ore in a furnace, then combine at a crafting table.",
                    i % 7,
                    i % 5
                ),
            )
        })
        .collect();

    let (chunks, _) = chunk_documents(&docs, 500, 50).expect("chunk corpus");
    index.upsert(&chunks).expect("upsert corpus");

    Retriever::new(index, embedder)
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_search");
    group.measurement_time(Duration::from_secs(10));

    for size in [100, 1_000, 5_000] {
        let retriever = build_retriever(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                retriever
                    .retrieve("how do i craft item 42 from ore", 5, 0.1)
                    .expect("search")
            });
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_query", |b| {
        b.iter(|| normalize_query("  @LoreBot How do I   Craft a Diamond Pickaxe?!  "));
    });
}

criterion_group!(benches, bench_search, bench_normalize);
criterion_main!(benches);
