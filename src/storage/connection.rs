//! Shared connection handling for the `SQLite` stores.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), the
/// inner value is recovered and a warning logged. The connection state is
/// still valid; abandoning it would turn one panic into a cascading
/// failure.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent access.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds for locks instead of
///   failing immediately with `SQLITE_BUSY`
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a string result which execute_batch would choke
    // on, hence pragma_update with ignored results
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");

    Ok(())
}

/// Commits an open transaction on success, rolls back on failure.
///
/// The inner error wins over any rollback error; a commit failure is
/// surfaced as an `OperationFailed` for the named operation.
pub(crate) fn finish_transaction<T>(
    conn: &Connection,
    result: Result<T>,
    operation: &str,
) -> Result<T> {
    match result {
        Ok(value) => conn
            .execute("COMMIT", [])
            .map(|_| value)
            .map_err(|e| Error::OperationFailed {
                operation: format!("commit_{operation}"),
                cause: e.to_string(),
            }),
        Err(err) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(err)
        },
    }
}
