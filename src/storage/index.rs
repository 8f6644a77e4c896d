//! `SQLite`-backed chunk index.
//!
//! Authoritative store for chunks, their embeddings, and the index
//! metadata used for staleness detection. Similarity search is an exact
//! cosine scan over the stored vectors; the corpus is domain-limited
//! (thousands of chunks, not millions), so a scan beats the operational
//! cost of an ANN sidecar here.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. `SQLite`'s WAL mode
//! and `busy_timeout` pragma mitigate contention:
//!
//! - **WAL mode**: allows concurrent readers with a single writer
//! - **whole-row writes**: `INSERT OR REPLACE` of complete records only,
//!   so a reader never observes a chunk without its embedding

use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{Chunk, ChunkId, IndexMetadata};
use crate::storage::connection::{acquire_lock, configure_connection, finish_transaction};
use crate::{Error, Result, current_timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// `SQLite`-backed chunk index with embedding similarity search.
pub struct SqliteChunkIndex {
    /// Connection to the `SQLite` database.
    ///
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
    /// Embedding generator; its model id is recorded in the metadata.
    embedder: Arc<dyn Embedder>,
}

impl SqliteChunkIndex {
    /// Opens (or creates) a chunk index at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_chunk_index".to_string(),
            cause: e.to_string(),
        })?;

        let index = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            embedder,
        };

        index.initialize()?;
        Ok(index)
    }

    /// Creates an in-memory chunk index (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_chunk_index_in_memory".to_string(),
            cause: e.to_string(),
        })?;

        let index = Self {
            conn: Mutex::new(conn),
            db_path: None,
            embedder,
        };

        index.initialize()?;
        Ok(index)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Initializes the database schema.
    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        configure_connection(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source_title TEXT NOT NULL,
                source_url TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_chunks_table".to_string(),
            cause: e.to_string(),
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS index_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                embedding_model TEXT NOT NULL,
                built_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_index_meta_table".to_string(),
            cause: e.to_string(),
        })?;

        // Index on source_title for per-source queries and stable ordering
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_title, chunk_index)",
            [],
        );

        Ok(())
    }

    /// Inserts or replaces chunks, computing missing embeddings first.
    ///
    /// Embeddings for all chunks lacking one are computed up front; if any
    /// computation fails the batch aborts with nothing written, so a chunk
    /// is never persisted without its embedding. The write itself is a
    /// single transaction of whole-row `INSERT OR REPLACE` statements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmbeddingFailed`] if the embedding backend fails,
    /// or [`Error::OperationFailed`] on database errors.
    #[instrument(skip(self, chunks), fields(batch = chunks.len()))]
    pub fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        // Embed outside the connection lock; this is the slow part.
        let pending: Vec<&Chunk> = chunks.iter().filter(|c| c.embedding.is_none()).collect();
        let texts: Vec<&str> = pending.iter().map(|c| c.text.as_str()).collect();
        let computed = self.embedder.embed_batch(&texts)?;

        let mut embeddings: Vec<(&Chunk, Vec<f32>)> = Vec::with_capacity(chunks.len());
        let mut computed_iter = computed.into_iter();
        for chunk in chunks {
            let embedding = match &chunk.embedding {
                Some(e) => e.clone(),
                None => computed_iter.next().ok_or_else(|| Error::EmbeddingFailed {
                    cause: "embedding batch returned fewer vectors than requested".to_string(),
                })?,
            };
            embeddings.push((chunk, embedding));
        }

        let conn = acquire_lock(&self.conn);

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::OperationFailed {
                operation: "begin_upsert".to_string(),
                cause: e.to_string(),
            })?;

        let result = (|| {
            for (chunk, embedding) in &embeddings {
                conn.execute(
                    "INSERT OR REPLACE INTO chunks
                        (id, source_title, source_url, chunk_index, content, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        chunk.id.as_str(),
                        chunk.source_title,
                        chunk.source_url,
                        i64::try_from(chunk.chunk_index).unwrap_or(i64::MAX),
                        chunk.text,
                        embedding_to_blob(embedding),
                    ],
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "upsert_chunk".to_string(),
                    cause: e.to_string(),
                })?;
            }

            conn.execute(
                "INSERT INTO index_meta (id, embedding_model, built_at)
                 VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                    embedding_model = excluded.embedding_model,
                    built_at = excluded.built_at",
                params![self.embedder.model_id(), current_timestamp()],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "update_index_meta".to_string(),
                cause: e.to_string(),
            })?;

            Ok(())
        })();

        finish_transaction(&conn, result, "upsert")?;

        metrics::counter!("index_chunks_upserted_total").increment(chunks.len() as u64);
        tracing::debug!(chunks = chunks.len(), "upserted chunk batch");
        Ok(())
    }

    /// Destroys all chunks and metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::OperationFailed {
                operation: "begin_reset".to_string(),
                cause: e.to_string(),
            })?;

        let result = (|| {
            conn.execute("DELETE FROM chunks", [])
                .map_err(|e| Error::OperationFailed {
                    operation: "reset_chunks".to_string(),
                    cause: e.to_string(),
                })?;
            conn.execute("DELETE FROM index_meta", [])
                .map_err(|e| Error::OperationFailed {
                    operation: "reset_index_meta".to_string(),
                    cause: e.to_string(),
                })?;
            Ok(())
        })();

        finish_transaction(&conn, result, "reset")?;

        tracing::info!("chunk index reset");
        Ok(())
    }

    /// Returns the `k` nearest chunks to the query embedding.
    ///
    /// Scores are cosine similarities clamped to `[0.0, 1.0]`, descending;
    /// ties break by `(source_title, chunk_index)` so results are stable.
    /// An empty index returns an empty Vec, never an error.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = acquire_lock(&self.conn);

        let mut stmt = conn
            .prepare(
                "SELECT id, source_title, source_url, chunk_index, content, embedding
                 FROM chunks
                 ORDER BY source_title, chunk_index",
            )
            .map_err(|e| Error::OperationFailed {
                operation: "prepare_search".to_string(),
                cause: e.to_string(),
            })?;

        let rows = stmt
            .query_map([], |row| {
                let embedding_blob: Vec<u8> = row.get(5)?;
                Ok(Chunk {
                    id: ChunkId::from(row.get::<_, String>(0)?),
                    source_title: row.get(1)?,
                    source_url: row.get(2)?,
                    chunk_index: usize::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                    text: row.get(4)?,
                    embedding: Some(blob_to_embedding(&embedding_blob)),
                })
            })
            .map_err(|e| Error::OperationFailed {
                operation: "search_chunks".to_string(),
                cause: e.to_string(),
            })?;

        let mut scored: Vec<(Chunk, f32)> = Vec::new();
        for row in rows {
            let chunk = row.map_err(|e| Error::OperationFailed {
                operation: "read_chunk_row".to_string(),
                cause: e.to_string(),
            })?;
            let score = chunk
                .embedding
                .as_deref()
                .map_or(0.0, |e| cosine_similarity(query_embedding, e))
                .clamp(0.0, 1.0);
            scored.push((chunk, score));
        }

        // Stable sort preserves the (source_title, chunk_index) order for
        // equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        metrics::counter!("index_searches_total").increment(1);
        Ok(scored)
    }

    /// Returns the index metadata.
    ///
    /// An index that has never been built reports zero chunks and the live
    /// embedder's model id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn stats(&self) -> Result<IndexMetadata> {
        let conn = acquire_lock(&self.conn);

        let total_chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| Error::OperationFailed {
                operation: "count_chunks".to_string(),
                cause: e.to_string(),
            })?;

        let meta: Option<(String, i64)> = conn
            .query_row(
                "SELECT embedding_model, built_at FROM index_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "read_index_meta".to_string(),
                cause: e.to_string(),
            })?;

        Ok(meta.map_or_else(
            || IndexMetadata::empty(self.embedder.model_id()),
            |(embedding_model_id, built_at)| IndexMetadata {
                total_chunks: usize::try_from(total_chunks).unwrap_or(0),
                embedding_model_id,
                built_at,
            },
        ))
    }
}

/// Serializes an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserializes little-endian f32 bytes back into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FastEmbedEmbedder;
    use crate::ingest::chunk_documents;
    use crate::models::Document;

    fn test_embedder() -> Arc<dyn Embedder> {
        Arc::new(FastEmbedEmbedder::new())
    }

    fn torch_doc() -> Document {
        Document::new(
            "Torch",
            "https://wiki/Torch",
            "A torch requires 1 coal and 1 stick. Place the coal above the stick.",
        )
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.25, -1.5, 3.75, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_search_empty_index_returns_empty() {
        let index = SqliteChunkIndex::in_memory(test_embedder()).unwrap();
        let results = index.search(&[0.5f32; 384], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_upsert_and_search() {
        let embedder = test_embedder();
        let index = SqliteChunkIndex::in_memory(Arc::clone(&embedder)).unwrap();

        let (chunks, _) = chunk_documents(&[torch_doc()], 500, 50).unwrap();
        index.upsert(&chunks).unwrap();

        let query = embedder.embed("torch coal stick").unwrap();
        let results = index.search(&query, 5).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.source_title, "Torch");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let index = SqliteChunkIndex::in_memory(test_embedder()).unwrap();
        let (chunks, _) = chunk_documents(&[torch_doc()], 500, 50).unwrap();

        index.upsert(&chunks).unwrap();
        index.upsert(&chunks).unwrap();

        assert_eq!(index.stats().unwrap().total_chunks, chunks.len());
    }

    #[test]
    fn test_rebuild_yields_identical_ids() {
        let index = SqliteChunkIndex::in_memory(test_embedder()).unwrap();
        let docs = vec![torch_doc()];

        let (first, _) = chunk_documents(&docs, 500, 50).unwrap();
        index.upsert(&first).unwrap();
        let count_first = index.stats().unwrap().total_chunks;

        index.reset().unwrap();
        assert_eq!(index.stats().unwrap().total_chunks, 0);

        let (second, _) = chunk_documents(&docs, 500, 50).unwrap();
        index.upsert(&second).unwrap();

        assert_eq!(index.stats().unwrap().total_chunks, count_first);
        let ids_first: Vec<_> = first.iter().map(|c| c.id.clone()).collect();
        let ids_second: Vec<_> = second.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn test_stats_records_model_id() {
        let embedder = test_embedder();
        let index = SqliteChunkIndex::in_memory(Arc::clone(&embedder)).unwrap();

        let (chunks, _) = chunk_documents(&[torch_doc()], 500, 50).unwrap();
        index.upsert(&chunks).unwrap();

        let meta = index.stats().unwrap();
        assert_eq!(meta.embedding_model_id, embedder.model_id());
        assert!(meta.built_at > 0);
    }

    #[test]
    fn test_failing_embedder_aborts_batch() {
        struct FailingEmbedder;

        impl Embedder for FailingEmbedder {
            fn dimensions(&self) -> usize {
                384
            }
            fn model_id(&self) -> &str {
                "failing"
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(Error::EmbeddingFailed {
                    cause: "backend down".to_string(),
                })
            }
        }

        let index = SqliteChunkIndex::in_memory(Arc::new(FailingEmbedder)).unwrap();
        let (chunks, _) = chunk_documents(&[torch_doc()], 500, 50).unwrap();

        let err = index.upsert(&chunks);
        assert!(matches!(err, Err(Error::EmbeddingFailed { .. })));
        // Nothing partially upserted
        assert_eq!(index.stats().unwrap().total_chunks, 0);
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let embedder = test_embedder();
        let index = SqliteChunkIndex::in_memory(Arc::clone(&embedder)).unwrap();

        let docs = vec![
            torch_doc(),
            Document::new(
                "Furnace",
                "https://wiki/Furnace",
                "A furnace is built from 8 cobblestone and smelts ore.",
            ),
        ];
        let (chunks, _) = chunk_documents(&docs, 500, 50).unwrap();
        index.upsert(&chunks).unwrap();

        let query = embedder.embed("how do i craft a torch from coal").unwrap();
        let results = index.search(&query, 2).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
        assert_eq!(results[0].0.source_title, "Torch");
    }

    #[test]
    fn test_concurrent_search_during_upsert() {
        use std::thread;

        let embedder = test_embedder();
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(
            SqliteChunkIndex::open(dir.path().join("index.db"), Arc::clone(&embedder)).unwrap(),
        );

        let (chunks, _) = chunk_documents(&[torch_doc()], 500, 50).unwrap();
        index.upsert(&chunks).unwrap();

        let query = embedder.embed("torch coal").unwrap();

        let mut handles = vec![];
        for _ in 0..4 {
            let index = Arc::clone(&index);
            let query = query.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    let results = index.search(&query, 3).unwrap();
                    // Every visible record is complete
                    for (chunk, _) in results {
                        assert!(chunk.embedding.is_some());
                        assert!(!chunk.text.is_empty());
                    }
                }
            }));
        }

        let writer = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..10 {
                    index.upsert(&chunks).unwrap();
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        writer.join().unwrap();
    }
}
