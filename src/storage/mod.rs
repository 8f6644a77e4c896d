//! Persistent storage layer.
//!
//! Two independent `SQLite` stores, no shared schema:
//! - **Chunk index** (`index`): chunks + embeddings + index metadata,
//!   similarity-searchable
//! - **Response cache** (`cache`): generated answers keyed by normalized
//!   query, with hit accounting
//!
//! Both use WAL mode with a mutex-guarded connection; writers insert or
//! replace whole rows only, so concurrent readers never observe a torn
//! record.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod cache;
mod connection;
pub mod index;

pub use cache::{SqliteResponseCache, normalize_query};
pub use connection::{acquire_lock, configure_connection};
pub use index::SqliteChunkIndex;
