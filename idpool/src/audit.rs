//! Correction audit trail
//!
//! Every binding change made by a remapping or record-update batch is
//! written to `correction_audit` inside the batch's own transaction, so the
//! trail and the table can never disagree.

use rusqlite::{Transaction, params};
use serde::Serialize;

use crate::errors::{IdPoolError, Result};
use crate::project::ProjectId;
use crate::store::IdentifierStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditMode {
    /// Record moved between identifiers by the remapping engine
    Remap,
    /// Record key text replaced in place
    RecordUpdate,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remap => "remap",
            Self::RecordUpdate => "record_update",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "remap" => Some(Self::Remap),
            "record_update" => Some(Self::RecordUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub batch_id: String,
    pub mode: AuditMode,
    pub identifier: String,
    pub previous_record: Option<String>,
    pub new_record: Option<String>,
    pub applied_at: String,
}

pub(crate) struct AuditWriter<'a> {
    tx: &'a Transaction<'a>,
    project: &'a ProjectId,
    batch_id: &'a str,
    mode: AuditMode,
    applied_at: String,
}

impl<'a> AuditWriter<'a> {
    pub(crate) fn new(
        tx: &'a Transaction<'a>,
        project: &'a ProjectId,
        batch_id: &'a str,
        mode: AuditMode,
    ) -> Self {
        Self {
            tx,
            project,
            batch_id,
            mode,
            applied_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub(crate) fn record(
        &self,
        identifier: &str,
        previous_record: Option<&str>,
        new_record: Option<&str>,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO correction_audit
                (batch_id, project_id, mode, identifier, previous_record, new_record, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.batch_id,
                self.project.as_str(),
                self.mode.as_str(),
                identifier,
                previous_record,
                new_record,
                self.applied_at,
            ],
        )?;
        Ok(())
    }
}

/// Audit rows written by one batch, in the order they were recorded.
pub fn batch_entries(
    store: &IdentifierStore,
    project: &ProjectId,
    batch_id: &str,
) -> Result<Vec<AuditEntry>> {
    let conn = store.read_connection()?;
    let mut stmt = conn.prepare(
        "SELECT batch_id, mode, identifier, previous_record, new_record, applied_at
         FROM correction_audit
         WHERE project_id = ?1 AND batch_id = ?2
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![project.as_str(), batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(
            |(batch_id, mode, identifier, previous_record, new_record, applied_at)| {
                let mode = AuditMode::parse(&mode).ok_or_else(|| {
                    IdPoolError::storage(format!(
                        "unknown audit mode '{mode}' in batch {batch_id}"
                    ))
                })?;
                Ok(AuditEntry {
                    batch_id,
                    mode,
                    identifier,
                    previous_record,
                    new_record,
                    applied_at,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn unknown_mode_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentifierStore::open(&dir.path().join("audit.db")).unwrap();
        let project = ProjectId::new("16894").unwrap();
        store
            .read_connection()
            .unwrap()
            .execute(
                "INSERT INTO correction_audit
                    (batch_id, project_id, mode, identifier, previous_record, new_record, applied_at)
                 VALUES ('b1', '16894', 'merge', 'A', 'r1', 'r2', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let err = batch_entries(&store, &project, "b1").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::StorageError);
        assert!(err.to_string().contains("unknown audit mode 'merge'"));
    }

    #[test]
    fn modes_round_trip_through_text() {
        for mode in [AuditMode::Remap, AuditMode::RecordUpdate] {
            assert_eq!(AuditMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(AuditMode::parse("Remap"), None);
    }
}
