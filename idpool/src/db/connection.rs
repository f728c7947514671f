//! Connection pooling and pragma configuration

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::{IdPoolError, Result};

/// Pool type shared by every store handle.
pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits for another process (CLI vs. server) to release
/// the database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize a connection pool with pragmas applied to every connection.
///
/// Creates the database file (and its parent directory) if missing.
pub fn initialize_pool(db_path: &Path, pool_size: u32) -> Result<DbPool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            IdPoolError::io_with_source(
                format!("failed to create db directory: {}", parent.display()),
                e,
            )
        })?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(apply_pragmas);
    let pool = Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| {
            IdPoolError::storage_with_source(
                format!("failed to open db at {}", db_path.display()),
                e,
            )
        })?;

    let conn = pool.get()?;
    verify_pragmas(&conn)?;

    tracing::debug!(path = %db_path.display(), pool_size, "identifier db pool initialized");
    Ok(pool)
}

fn apply_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // An allocation may already be written back to REDCap; it must survive
    // power loss.
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn verify_pragmas(conn: &Connection) -> Result<()> {
    let mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        // Some filesystems refuse WAL; rollback journaling is still durable.
        tracing::warn!(journal_mode = %mode, "WAL mode unavailable, continuing");
    }
    Ok(())
}
