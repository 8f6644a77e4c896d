//! `SQLite`-backed response cache.
//!
//! Caches generated answers keyed by a normalized form of the raw query,
//! so semantically identical phrasings ("How do I craft a Sword?" /
//! "how do i craft a sword") collide deterministically. Every lookup that
//! finds an entry counts as a hit and bumps the popularity accounting
//! atomically with the read.
//!
//! # Concurrency Model
//!
//! A `Mutex<Connection>` serializes the short lookup/store critical
//! sections; the mutex is never held across retrieval or generation, so
//! a miss for one key cannot block traffic on other keys for any
//! meaningful period. Per-key atomicity comes from `SQLite` transactions:
//! a lookup racing a store observes either the pre-store or post-store
//! row, never a partially written one. Store is an atomic whole-row
//! replace (last writer wins), which is what makes concurrent misses for
//! the same key safe.

use crate::models::{CacheEntry, CacheStats, SourceRef};
use crate::storage::connection::{acquire_lock, configure_connection, finish_transaction};
use crate::{Error, Result, current_timestamp};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use tracing::instrument;

/// Creates a compile-time verified regex wrapped in [`LazyLock`].
///
/// # Safety
///
/// The regex pattern is verified at compile time and cannot fail at
/// runtime. The `unreachable!()` branch exists only for type checking.
macro_rules! lazy_regex {
    ($pattern:expr) => {
        LazyLock::new(|| Regex::new($pattern).unwrap_or_else(|_| unreachable!()))
    };
}

/// Leading bot-mention tokens, e.g. `@LoreBot how do I...`.
static MENTION_PATTERN: LazyLock<Regex> = lazy_regex!(r"^(?:@[\w.-]+\s*)+");

/// Runs of whitespace, collapsed to a single space.
static WHITESPACE_PATTERN: LazyLock<Regex> = lazy_regex!(r"\s+");

/// Canonicalizes a raw query into its cache key.
///
/// Strips leading bot-mention tokens, lowercases, collapses whitespace
/// runs, and strips leading/trailing punctuation. Pure and idempotent:
/// `normalize_query(normalize_query(q)) == normalize_query(q)`.
#[must_use]
pub fn normalize_query(raw: &str) -> String {
    let stripped = MENTION_PATTERN.replace(raw.trim(), "");
    let lowered = stripped.to_lowercase();
    let collapsed = WHITESPACE_PATTERN.replace_all(&lowered, " ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// `SQLite`-backed answer cache with hit accounting.
pub struct SqliteResponseCache {
    /// Connection to the `SQLite` database.
    ///
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
    /// Maximum number of entries (0 = unbounded). When exceeded, the
    /// least-recently-accessed entries are evicted at store time.
    max_entries: usize,
}

impl SqliteResponseCache {
    /// Opens (or creates) a response cache at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>, max_entries: usize) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_response_cache".to_string(),
            cause: e.to_string(),
        })?;

        let cache = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            max_entries,
        };

        cache.initialize()?;
        Ok(cache)
    }

    /// Creates an in-memory response cache (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(max_entries: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_response_cache_in_memory".to_string(),
            cause: e.to_string(),
        })?;

        let cache = Self {
            conn: Mutex::new(conn),
            db_path: None,
            max_entries,
        };

        cache.initialize()?;
        Ok(cache)
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

        // access_seq is a monotonic counter bumped on every store and hit;
        // it gives recency a total order even when two accesses land in
        // the same clock second
        conn.execute(
            "CREATE TABLE IF NOT EXISTS qa_cache (
                normalized_key TEXT PRIMARY KEY,
                raw_query_examples TEXT NOT NULL,
                answer TEXT NOT NULL,
                sources TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                access_seq INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_qa_cache_table".to_string(),
            cause: e.to_string(),
        })?;

        // Index for popularity queries and LRU eviction scans
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_qa_cache_popularity
             ON qa_cache(hit_count DESC, access_seq DESC)",
            [],
        );

        Ok(())
    }

    /// Looks up the cached answer for a raw query.
    ///
    /// Computes the normalized key and, if an entry exists, increments its
    /// hit counter and refreshes its access timestamp atomically with the
    /// read. A found entry always counts as a hit, even if the caller
    /// discards the result. Returns the post-increment entry.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    #[instrument(skip(self, raw_query))]
    pub fn lookup(&self, raw_query: &str) -> Result<Option<CacheEntry>> {
        let key = normalize_query(raw_query);
        if key.is_empty() {
            return Ok(None);
        }

        let now = current_timestamp();
        let conn = acquire_lock(&self.conn);

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::OperationFailed {
                operation: "begin_lookup".to_string(),
                cause: e.to_string(),
            })?;

        let result = (|| {
            let updated = conn
                .execute(
                    "UPDATE qa_cache
                     SET hit_count = hit_count + 1,
                         last_accessed_at = ?1,
                         access_seq = (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM qa_cache)
                     WHERE normalized_key = ?2",
                    params![now, key],
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "touch_cache_entry".to_string(),
                    cause: e.to_string(),
                })?;

            if updated == 0 {
                return Ok(None);
            }

            conn.query_row(
                "SELECT normalized_key, raw_query_examples, answer, sources,
                        hit_count, created_at, last_accessed_at
                 FROM qa_cache WHERE normalized_key = ?1",
                params![key],
                row_to_entry,
            )
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "read_cache_entry".to_string(),
                cause: e.to_string(),
            })
        })();

        let entry = finish_transaction(&conn, result, "lookup")?;

        if entry.is_some() {
            metrics::counter!("cache_hits_total").increment(1);
            tracing::debug!(key = %key, "cache hit");
        } else {
            metrics::counter!("cache_misses_total").increment(1);
            tracing::debug!(key = %key, "cache miss");
        }
        Ok(entry)
    }

    /// Stores (or overwrites) the answer for a raw query.
    ///
    /// Idempotent under races: two concurrent misses that both generated
    /// an answer for the same key resolve to a single row, last writer
    /// wins. Existing hit counts and creation timestamps survive an
    /// overwrite; the raw query is merged into the entry's example set.
    ///
    /// Callers must only store successfully generated answers; a failed
    /// generation must never reach the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the query normalizes to an empty
    /// key, or [`Error::OperationFailed`] on database failures.
    #[instrument(skip(self, raw_query, answer_text, sources))]
    pub fn store(&self, raw_query: &str, answer_text: &str, sources: &[SourceRef]) -> Result<()> {
        let key = normalize_query(raw_query);
        if key.is_empty() {
            return Err(Error::InvalidInput(
                "query normalizes to an empty cache key".to_string(),
            ));
        }

        let sources_json = serde_json::to_string(sources).map_err(|e| Error::OperationFailed {
            operation: "serialize_sources".to_string(),
            cause: e.to_string(),
        })?;

        let now = current_timestamp();
        let conn = acquire_lock(&self.conn);

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::OperationFailed {
                operation: "begin_store".to_string(),
                cause: e.to_string(),
            })?;

        let result = (|| {
            // hit_count travels as i64; rusqlite has no ToSql for u64
            let existing: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT raw_query_examples, hit_count, created_at
                     FROM qa_cache WHERE normalized_key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| Error::OperationFailed {
                    operation: "read_existing_entry".to_string(),
                    cause: e.to_string(),
                })?;

            let (mut examples, hit_count, created_at) = match existing {
                Some((examples_json, hits, created)) => {
                    (parse_examples(&examples_json), hits, created)
                },
                None => (BTreeSet::new(), 0, now),
            };
            examples.insert(raw_query.trim().to_string());

            let examples_json =
                serde_json::to_string(&examples).map_err(|e| Error::OperationFailed {
                    operation: "serialize_examples".to_string(),
                    cause: e.to_string(),
                })?;

            let next_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(access_seq), 0) + 1 FROM qa_cache",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "next_access_seq".to_string(),
                    cause: e.to_string(),
                })?;

            conn.execute(
                "INSERT OR REPLACE INTO qa_cache
                    (normalized_key, raw_query_examples, answer, sources,
                     hit_count, created_at, last_accessed_at, access_seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key,
                    examples_json,
                    answer_text,
                    sources_json,
                    hit_count,
                    created_at,
                    now,
                    next_seq
                ],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "store_cache_entry".to_string(),
                cause: e.to_string(),
            })?;

            self.evict_over_capacity(&conn)
        })();

        finish_transaction(&conn, result, "store")?;

        metrics::counter!("cache_stores_total").increment(1);
        tracing::debug!(key = %key, "stored cache entry");
        Ok(())
    }

    /// Evicts least-recently-accessed entries beyond `max_entries`.
    ///
    /// Runs inside the store transaction; reads serialize on the same
    /// connection, so an entry can never be evicted mid-read.
    fn evict_over_capacity(&self, conn: &Connection) -> Result<()> {
        if self.max_entries == 0 {
            return Ok(());
        }

        let evicted = conn
            .execute(
                "DELETE FROM qa_cache WHERE normalized_key NOT IN (
                    SELECT normalized_key FROM qa_cache
                    ORDER BY access_seq DESC
                    LIMIT ?1
                 )",
                params![i64::try_from(self.max_entries).unwrap_or(i64::MAX)],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "evict_cache_entries".to_string(),
                cause: e.to_string(),
            })?;

        if evicted > 0 {
            metrics::counter!("cache_evictions_total").increment(evicted as u64);
            tracing::debug!(evicted, "evicted cache entries over capacity");
        }
        Ok(())
    }

    /// Returns the `n` most popular entries.
    ///
    /// Ordered by hit count descending, ties broken by most recent access.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn top_queries(&self, n: usize) -> Result<Vec<CacheEntry>> {
        let conn = acquire_lock(&self.conn);

        let mut stmt = conn
            .prepare(
                "SELECT normalized_key, raw_query_examples, answer, sources,
                        hit_count, created_at, last_accessed_at
                 FROM qa_cache
                 ORDER BY hit_count DESC, access_seq DESC
                 LIMIT ?1",
            )
            .map_err(|e| Error::OperationFailed {
                operation: "prepare_top_queries".to_string(),
                cause: e.to_string(),
            })?;

        let rows = stmt
            .query_map(params![i64::try_from(n).unwrap_or(i64::MAX)], row_to_entry)
            .map_err(|e| Error::OperationFailed {
                operation: "top_queries".to_string(),
                cause: e.to_string(),
            })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::OperationFailed {
                operation: "read_top_queries".to_string(),
                cause: e.to_string(),
            })
    }

    /// Destroys all entries.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        conn.execute("DELETE FROM qa_cache", [])
            .map_err(|e| Error::OperationFailed {
                operation: "clear_cache".to_string(),
                cause: e.to_string(),
            })?;

        tracing::info!("response cache cleared");
        Ok(())
    }

    /// Returns aggregate cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = acquire_lock(&self.conn);

        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM qa_cache",
            [],
            |row| {
                Ok(CacheStats {
                    entries: usize::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
                    total_hits: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                })
            },
        )
        .map_err(|e| Error::OperationFailed {
            operation: "cache_stats".to_string(),
            cause: e.to_string(),
        })
    }
}

/// Maps a `qa_cache` row to a [`CacheEntry`].
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let examples_json: String = row.get(1)?;
    let sources_json: String = row.get(3)?;
    Ok(CacheEntry {
        normalized_key: row.get(0)?,
        raw_query_examples: parse_examples(&examples_json),
        answer_text: row.get(2)?,
        sources: serde_json::from_str(&sources_json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "corrupt sources JSON in cache row, dropping citations");
            Vec::new()
        }),
        hit_count: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        created_at: row.get(5)?,
        last_accessed_at: row.get(6)?,
    })
}

/// Parses the stored example set, tolerating legacy or corrupt JSON.
fn parse_examples(json: &str) -> BTreeSet<String> {
    serde_json::from_str(json).unwrap_or_default()
}
