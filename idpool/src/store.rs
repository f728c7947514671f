//! Identifier store
//!
//! A durable table of pre-generated identifiers per project. Identifiers are
//! created in bulk (`load`, `import_map`) and bound to a record key exactly
//! once by `get_or_allocate`, oldest first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rand::seq::SliceRandom;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Serialize;

use crate::db::{self, DbPool};
use crate::errors::{IdPoolError, Result};
use crate::locks::{self, ProjectLocks};
use crate::project::ProjectId;

/// One row of a project's identifier table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierRecord {
    /// Allocation order; strictly increasing, never reused.
    pub sequence: i64,
    pub identifier: String,
    /// The external record this identifier is bound to, if any.
    pub record_key: Option<String>,
}

impl IdentifierRecord {
    pub fn is_available(&self) -> bool {
        self.record_key.is_none()
    }
}

/// Result of a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub inserted: usize,
    /// Input identifiers that were already in the table and were skipped
    pub already_present: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub total: u64,
    pub bound: u64,
    pub available: u64,
}

struct StoreInner {
    pool: DbPool,
    locks: ProjectLocks,
    path: PathBuf,
}

/// Handle to one identifier database. Cheap to clone; clones share the
/// connection pool and the per-project locks.
#[derive(Clone)]
pub struct IdentifierStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for IdentifierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierStore")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl IdentifierStore {
    pub const DEFAULT_POOL_SIZE: u32 = 8;

    /// Open (creating if needed) the identifier database at `path` and bring
    /// its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_pool_size(path, Self::DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(path: &Path, pool_size: u32) -> Result<Self> {
        let pool = db::initialize_pool(path, pool_size)?;
        {
            let mut conn = pool.get()?;
            db::migrations::migrate_to_latest(&mut conn)?;
        }

        tracing::debug!(path = %path.display(), "identifier store opened");

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                locks: ProjectLocks::default(),
                path: path.to_path_buf(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn read_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.inner.pool.get()?)
    }

    /// Run `op` in an IMMEDIATE transaction while holding the project lock.
    ///
    /// With `dry_run` the transaction is rolled back even on success.
    pub(crate) fn write_tx<T>(
        &self,
        project: &ProjectId,
        dry_run: bool,
        op: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        let lock = self.inner.locks.lock_for(project);
        let _guard = locks::acquire(&lock);
        let mut conn = self.read_connection()?;
        if dry_run {
            db::execute_then_rollback(&mut conn, TransactionBehavior::Immediate, op)
        } else {
            db::execute_in_transaction(&mut conn, TransactionBehavior::Immediate, op)
        }
    }

    /// Insert fresh identifiers.
    ///
    /// Duplicates within `identifiers` are rejected before anything is
    /// written. Identifiers already in the table are skipped and counted.
    /// With `randomize`, insertion (and therefore allocation) order is a
    /// random shuffle of the input.
    pub fn load(
        &self,
        project: &ProjectId,
        identifiers: &[String],
        randomize: bool,
    ) -> Result<LoadSummary> {
        ensure_non_empty(identifiers.iter().map(String::as_str), "identifier")?;
        let duplicates = find_duplicates(identifiers.iter().map(String::as_str));
        if !duplicates.is_empty() {
            return Err(IdPoolError::validation(format!(
                "duplicate identifiers in input: {}",
                duplicates.join(", ")
            )));
        }

        let mut ordered: Vec<&String> = identifiers.iter().collect();
        if randomize {
            ordered.shuffle(&mut rand::rng());
        }

        let summary = self.write_tx(project, false, |tx| {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO identifiers (project_id, identifier) VALUES (?1, ?2)",
            )?;
            let mut summary = LoadSummary::default();
            for identifier in ordered {
                if insert.execute(params![project.as_str(), identifier])? == 1 {
                    summary.inserted += 1;
                } else {
                    summary.already_present += 1;
                }
            }
            Ok(summary)
        })?;

        tracing::info!(
            project = %project,
            inserted = summary.inserted,
            already_present = summary.already_present,
            randomize,
            "loaded identifiers"
        );
        Ok(summary)
    }

    /// Seed an empty project table from `(identifier, record_key)` pairs,
    /// typically a previous export. Input order becomes allocation order.
    pub fn import_map(&self, project: &ProjectId, pairs: &[(String, String)]) -> Result<usize> {
        ensure_non_empty(pairs.iter().map(|(id, _)| id.as_str()), "identifier")?;
        ensure_non_empty(pairs.iter().map(|(_, rec)| rec.as_str()), "record")?;

        let dup_ids = find_duplicates(pairs.iter().map(|(id, _)| id.as_str()));
        if !dup_ids.is_empty() {
            return Err(IdPoolError::validation(format!(
                "duplicate identifiers in import: {}",
                dup_ids.join(", ")
            )));
        }
        let dup_records = find_duplicates(pairs.iter().map(|(_, rec)| rec.as_str()));
        if !dup_records.is_empty() {
            return Err(IdPoolError::validation(format!(
                "duplicate records in import: {}",
                dup_records.join(", ")
            )));
        }

        let inserted = self.write_tx(project, false, |tx| {
            let existing = count_rows(tx, project)?;
            if existing > 0 {
                return Err(IdPoolError::state(format!(
                    "project {project} already has {existing} identifiers; import requires an empty table"
                )));
            }

            let mut insert = tx.prepare(
                "INSERT INTO identifiers (project_id, identifier, record_key) VALUES (?1, ?2, ?3)",
            )?;
            for (identifier, record_key) in pairs {
                insert.execute(params![project.as_str(), identifier, record_key])?;
            }
            Ok(pairs.len())
        })?;

        tracing::info!(project = %project, inserted, "imported identifier map");
        Ok(inserted)
    }

    /// Return the identifier bound to `record_key`, binding the oldest
    /// available identifier first if the record has none yet.
    ///
    /// `Ok(None)` means the pool is exhausted; nothing was written and the
    /// caller should retry once more identifiers are loaded.
    pub fn get_or_allocate(&self, project: &ProjectId, record_key: &str) -> Result<Option<String>> {
        if record_key.is_empty() {
            return Err(IdPoolError::validation("record key must not be empty"));
        }

        self.write_tx(project, false, |tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT identifier FROM identifiers WHERE project_id = ?1 AND record_key = ?2",
                    params![project.as_str(), record_key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(identifier) = existing {
                tracing::debug!(project = %project, record = record_key, identifier = %identifier, "record already bound");
                return Ok(Some(identifier));
            }

            let next: Option<(i64, String)> = tx
                .query_row(
                    "SELECT sequence, identifier FROM identifiers
                     WHERE project_id = ?1 AND record_key IS NULL AND staged_record_key IS NULL
                     ORDER BY sequence
                     LIMIT 1",
                    params![project.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((sequence, identifier)) = next else {
                tracing::warn!(project = %project, record = record_key, "identifier pool exhausted");
                return Ok(None);
            };

            let updated = tx.execute(
                "UPDATE identifiers SET record_key = ?2 WHERE sequence = ?1 AND record_key IS NULL",
                params![sequence, record_key],
            )?;
            if updated != 1 {
                return Err(IdPoolError::storage(format!(
                    "identifier '{identifier}' was bound concurrently"
                )));
            }

            tracing::info!(project = %project, record = record_key, identifier = %identifier, "allocated identifier");
            Ok(Some(identifier))
        })
    }

    /// [`get_or_allocate`](Self::get_or_allocate) on tokio's blocking pool.
    pub async fn get_or_allocate_async(
        &self,
        project: ProjectId,
        record_key: String,
    ) -> Result<Option<String>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_or_allocate(&project, &record_key))
            .await
            .map_err(|e| IdPoolError::storage_with_source("allocation task failed", e))?
    }

    /// Every row of the project, in allocation order.
    pub fn export(&self, project: &ProjectId) -> Result<Vec<IdentifierRecord>> {
        let conn = self.read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT sequence, identifier, record_key FROM identifiers
             WHERE project_id = ?1
             ORDER BY sequence",
        )?;
        let rows = stmt
            .query_map(params![project.as_str()], |row| {
                Ok(IdentifierRecord {
                    sequence: row.get(0)?,
                    identifier: row.get(1)?,
                    record_key: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn stats(&self, project: &ProjectId) -> Result<PoolStats> {
        let conn = self.read_connection()?;
        let (total, bound): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(record_key) FROM identifiers WHERE project_id = ?1",
            params![project.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = total.max(0) as u64;
        let bound = bound.max(0) as u64;
        Ok(PoolStats {
            total,
            bound,
            available: total.saturating_sub(bound),
        })
    }

    /// Projects that have at least one identifier in this database.
    pub fn projects(&self) -> Result<Vec<ProjectId>> {
        let conn = self.read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT project_id FROM identifiers ORDER BY length(project_id), project_id",
        )?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(ProjectId::new).collect()
    }
}

pub(crate) fn count_rows(tx: &Transaction, project: &ProjectId) -> Result<i64> {
    Ok(tx.query_row(
        "SELECT COUNT(*) FROM identifiers WHERE project_id = ?1",
        params![project.as_str()],
        |row| row.get(0),
    )?)
}

/// Values that occur more than once, in first-seen order.
pub(crate) fn find_duplicates<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for value in values {
        if !seen.insert(value) && reported.insert(value) {
            duplicates.push(value.to_string());
        }
    }
    duplicates
}

pub(crate) fn ensure_non_empty<'a>(
    mut values: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<()> {
    if values.any(str::is_empty) {
        return Err(IdPoolError::validation(format!("empty {what} in input")));
    }
    Ok(())
}
