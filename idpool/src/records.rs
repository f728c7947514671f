//! Direct record-key updates
//!
//! For late corrections where the record key text itself was wrong rather
//! than bound to the wrong identifier. Unlike a remapping batch, an update
//! naming a missing identifier is only a warning; the rest of the batch
//! still commits.

use rusqlite::{ErrorCode, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditMode, AuditWriter};
use crate::errors::{IdPoolError, Result, Warning};
use crate::project::ProjectId;
use crate::remap::RemappingEngine;
use crate::store::{ensure_non_empty, find_duplicates};

/// Replace whatever record `identifier` is bound to with `record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(rename = "id")]
    pub identifier: String,
    pub record: String,
}

impl RecordUpdate {
    pub fn new(identifier: impl Into<String>, record: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            record: record.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordChange {
    pub identifier: String,
    pub previous_record: Option<String>,
    pub new_record: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdateReport {
    pub batch_id: String,
    pub updated: Vec<RecordChange>,
    pub missing: Vec<Warning>,
    pub dry_run: bool,
}

impl RemappingEngine {
    /// Overwrite record keys in place, as one transaction.
    ///
    /// Record keys may be exchanged between rows of the same batch. A new
    /// record key already bound to a row outside the batch aborts the whole
    /// batch with a validation error.
    pub fn update_records(
        &self,
        project: &ProjectId,
        updates: &[RecordUpdate],
        dry_run: bool,
    ) -> Result<RecordUpdateReport> {
        ensure_non_empty(updates.iter().map(|u| u.identifier.as_str()), "identifier")?;
        ensure_non_empty(updates.iter().map(|u| u.record.as_str()), "record")?;
        let dup_ids = find_duplicates(updates.iter().map(|u| u.identifier.as_str()));
        if !dup_ids.is_empty() {
            return Err(IdPoolError::validation(format!(
                "identifier listed more than once: {}",
                dup_ids.join(", ")
            )));
        }
        let dup_records = find_duplicates(updates.iter().map(|u| u.record.as_str()));
        if !dup_records.is_empty() {
            return Err(IdPoolError::validation(format!(
                "record listed more than once: {}",
                dup_records.join(", ")
            )));
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let result = self.store().write_tx(project, dry_run, |tx| {
            let mut missing = Vec::new();
            let mut changes = Vec::new();
            for update in updates {
                match current_record(tx, project, &update.identifier)? {
                    Some(previous_record) => changes.push(RecordChange {
                        identifier: update.identifier.clone(),
                        previous_record,
                        new_record: update.record.clone(),
                    }),
                    None => {
                        tracing::warn!(project = %project, identifier = %update.identifier, "record update skipped: identifier not found");
                        missing.push(Warning::IdentifierNotFound {
                            identifier: update.identifier.clone(),
                            role: "id",
                        });
                    }
                }
            }

            {
                let mut stage = tx.prepare(
                    "UPDATE identifiers SET staged_record_key = ?3, record_key = NULL
                     WHERE project_id = ?1 AND identifier = ?2",
                )?;
                for change in &changes {
                    stage.execute(params![
                        project.as_str(),
                        change.identifier,
                        change.new_record
                    ])?;
                }
            }
            tx.execute(
                "UPDATE identifiers
                 SET record_key = staged_record_key, staged_record_key = NULL
                 WHERE project_id = ?1 AND staged_record_key IS NOT NULL",
                params![project.as_str()],
            )
            .map_err(|e| conflict_or_storage(e, project))?;

            let audit = AuditWriter::new(tx, project, &batch_id, AuditMode::RecordUpdate);
            for change in &changes {
                tracing::info!(
                    project = %project,
                    identifier = %change.identifier,
                    from = change.previous_record.as_deref().unwrap_or("<unbound>"),
                    to = %change.new_record,
                    "record key updated"
                );
                audit.record(
                    &change.identifier,
                    change.previous_record.as_deref(),
                    Some(&change.new_record),
                )?;
            }

            Ok(RecordUpdateReport {
                batch_id: batch_id.clone(),
                updated: changes,
                missing,
                dry_run,
            })
        });

        match &result {
            Ok(report) => tracing::info!(
                project = %project,
                batch = %batch_id,
                updated = report.updated.len(),
                missing = report.missing.len(),
                dry_run,
                "record update batch finished"
            ),
            Err(e) => tracing::error!(project = %project, batch = %batch_id, "record update batch rolled back: {e}"),
        }
        result
    }
}

fn current_record(
    tx: &Transaction,
    project: &ProjectId,
    identifier: &str,
) -> Result<Option<Option<String>>> {
    Ok(tx
        .query_row(
            "SELECT record_key FROM identifiers WHERE project_id = ?1 AND identifier = ?2",
            params![project.as_str(), identifier],
            |row| row.get(0),
        )
        .optional()?)
}

fn conflict_or_storage(e: rusqlite::Error, project: &ProjectId) -> IdPoolError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => IdPoolError::validation(format!(
            "a new record key is already bound to another identifier in project {project}"
        )),
        _ => IdPoolError::from(e),
    }
}
