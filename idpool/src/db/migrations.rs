//! Schema versioning and migrations

use rusqlite::{Connection, TransactionBehavior};

use super::transactions::execute_in_transaction;
use crate::errors::{IdPoolError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const V1_SQL: &str = include_str!("../../schema/v1.sql");

/// Apply all migrations to bring the database to the current version.
///
/// Migrations are forward-only. A database written by a newer build is
/// refused rather than silently downgraded.
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(IdPoolError::state(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
            tx.execute_batch(V1_SQL)?;
            set_schema_version(tx, 1)?;
            Ok::<_, IdPoolError>(())
        })?;
        tracing::info!(version = 1, "applied identifier schema migration");
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
