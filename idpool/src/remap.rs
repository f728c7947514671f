//! Remapping engine
//!
//! Moves record bindings between identifiers after the fact. A batch of
//! `(current_id, corrected_id)` entries may describe any permutation,
//! including chains (A→B, B→C) and cycles (A→B, B→A). Updating rows one by
//! one would trip the record-key uniqueness constraint mid-way, so the batch
//! runs in two phases inside one transaction:
//!
//! 1. **stage**: each source row's record key moves into its
//!    `staged_record_key` column and `record_key` is cleared;
//! 2. **commit**: each destination takes the staged key of its source, then
//!    all staging columns are cleared.
//!
//! The result is then checked against a snapshot taken before phase 1. Any
//! mismatch rolls the whole batch back.

use std::collections::HashSet;

use rusqlite::{OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditMode, AuditWriter};
use crate::errors::{IdPoolError, PostconditionFailure, Result, Warning};
use crate::project::ProjectId;
use crate::store::{IdentifierStore, find_duplicates};

/// Whatever record is bound to `current_id` should end up on `corrected_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub current_id: String,
    pub corrected_id: String,
}

impl CorrectionEntry {
    pub fn new(current_id: impl Into<String>, corrected_id: impl Into<String>) -> Self {
        Self {
            current_id: current_id.into(),
            corrected_id: corrected_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemapOptions {
    /// Treat unknown identifiers as a fatal validation error instead of
    /// skipping the entry with a warning.
    pub strict: bool,
    /// Run every step, then roll back.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedCorrection {
    pub current_id: String,
    pub corrected_id: String,
    /// The record that moved (absent if `current_id` was unbound)
    pub record: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapReport {
    pub batch_id: String,
    pub applied: Vec<AppliedCorrection>,
    pub warnings: Vec<Warning>,
    /// Source identifiers left without a record because nothing moved onto them
    pub released: Vec<String>,
    pub dry_run: bool,
}

/// Snapshot of one valid entry taken before any mutation.
struct Planned<'e> {
    entry: &'e CorrectionEntry,
    /// Record bound to `current_id` before the batch
    moving: Option<String>,
    /// Record bound to `corrected_id` before the batch
    replaced: Option<String>,
}

/// Batch remapping over one identifier database.
#[derive(Debug, Clone)]
pub struct RemappingEngine {
    store: IdentifierStore,
}

impl RemappingEngine {
    pub fn new(store: IdentifierStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &IdentifierStore {
        &self.store
    }

    /// Apply a correction batch atomically.
    ///
    /// Holds the project lock for the whole transaction, so no allocation
    /// for the project can interleave with the batch.
    pub fn apply(
        &self,
        project: &ProjectId,
        entries: &[CorrectionEntry],
        options: RemapOptions,
    ) -> Result<RemapReport> {
        self.apply_with_check(project, entries, options, |_, expected, found| {
            expected == found
        })
    }

    /// [`apply`](Self::apply) with a pluggable post-condition predicate,
    /// `check(entry, expected_record, found_record)`.
    pub(crate) fn apply_with_check<F>(
        &self,
        project: &ProjectId,
        entries: &[CorrectionEntry],
        options: RemapOptions,
        check: F,
    ) -> Result<RemapReport>
    where
        F: Fn(&CorrectionEntry, Option<&str>, Option<&str>) -> bool,
    {
        validate_batch(entries)?;

        let batch_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            project = %project,
            batch = %batch_id,
            entries = entries.len(),
            strict = options.strict,
            dry_run = options.dry_run,
            "starting remapping batch"
        );

        let result = self.store.write_tx(project, options.dry_run, |tx| {
            let (planned, warnings) = plan(tx, project, entries, options.strict)?;
            ensure_no_displacement(&planned)?;

            stage(tx, project, &planned)?;
            commit(tx, project, &planned)?;
            verify(tx, project, &planned, &check)?;

            let released = released_sources(&planned);
            let audit = AuditWriter::new(tx, project, &batch_id, AuditMode::Remap);
            for p in &planned {
                audit.record(&p.entry.corrected_id, p.replaced.as_deref(), p.moving.as_deref())?;
            }
            for (identifier, record) in &released {
                audit.record(identifier, Some(record), None)?;
            }

            Ok(RemapReport {
                batch_id: batch_id.clone(),
                applied: planned
                    .iter()
                    .map(|p| AppliedCorrection {
                        current_id: p.entry.current_id.clone(),
                        corrected_id: p.entry.corrected_id.clone(),
                        record: p.moving.clone(),
                    })
                    .collect(),
                warnings,
                released: released.into_iter().map(|(id, _)| id).collect(),
                dry_run: options.dry_run,
            })
        });

        match &result {
            Ok(report) => tracing::info!(
                project = %project,
                batch = %batch_id,
                applied = report.applied.len(),
                skipped = report.warnings.len(),
                released = report.released.len(),
                dry_run = report.dry_run,
                "remapping batch {}",
                if report.dry_run { "validated (rolled back)" } else { "committed" }
            ),
            Err(e) => tracing::error!(
                project = %project,
                batch = %batch_id,
                category = e.category().as_str(),
                "remapping batch rolled back: {e}"
            ),
        }
        result
    }
}

/// Input checks that need no database access.
fn validate_batch(entries: &[CorrectionEntry]) -> Result<()> {
    if entries
        .iter()
        .any(|e| e.current_id.is_empty() || e.corrected_id.is_empty())
    {
        return Err(IdPoolError::validation("empty identifier in correction batch"));
    }
    let dup_current = find_duplicates(entries.iter().map(|e| e.current_id.as_str()));
    if !dup_current.is_empty() {
        return Err(IdPoolError::validation(format!(
            "current_id listed more than once: {}",
            dup_current.join(", ")
        )));
    }
    let dup_corrected = find_duplicates(entries.iter().map(|e| e.corrected_id.as_str()));
    if !dup_corrected.is_empty() {
        return Err(IdPoolError::validation(format!(
            "corrected_id listed more than once: {}",
            dup_corrected.join(", ")
        )));
    }
    Ok(())
}

/// Look up both sides of every entry and snapshot their bindings.
fn plan<'e>(
    tx: &Transaction,
    project: &ProjectId,
    entries: &'e [CorrectionEntry],
    strict: bool,
) -> Result<(Vec<Planned<'e>>, Vec<Warning>)> {
    let mut planned = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();

    for entry in entries {
        let current = lookup(tx, project, &entry.current_id)?;
        let corrected = lookup(tx, project, &entry.corrected_id)?;

        let missing = [
            (current.is_none(), "current_id", &entry.current_id),
            (corrected.is_none(), "corrected_id", &entry.corrected_id),
        ];
        let mut skip = false;
        for (absent, role, identifier) in missing {
            if !absent {
                continue;
            }
            if strict {
                return Err(IdPoolError::validation(format!(
                    "{role} '{identifier}' not found in project {project}"
                )));
            }
            tracing::warn!(project = %project, role, identifier = %identifier, "skipping correction: identifier not found");
            warnings.push(Warning::IdentifierNotFound {
                identifier: identifier.clone(),
                role,
            });
            skip = true;
        }
        if skip {
            continue;
        }

        let (Some(moving), Some(replaced)) = (current, corrected) else {
            continue;
        };
        tracing::info!(
            project = %project,
            from = %entry.current_id,
            to = %entry.corrected_id,
            record = moving.as_deref().unwrap_or("<unbound>"),
            "planning record move"
        );
        planned.push(Planned {
            entry,
            moving,
            replaced,
        });
    }

    Ok((planned, warnings))
}

/// Row lookup: `None` if the identifier does not exist, `Some(record)` otherwise.
fn lookup(
    tx: &Transaction,
    project: &ProjectId,
    identifier: &str,
) -> Result<Option<Option<String>>> {
    Ok(tx
        .query_row(
            "SELECT record_key FROM identifiers WHERE project_id = ?1 AND identifier = ?2",
            params![project.as_str(), identifier],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?)
}

/// A destination that already holds a record must also be a source in the
/// batch; otherwise its record would be silently dropped.
fn ensure_no_displacement(planned: &[Planned<'_>]) -> Result<()> {
    let sources: HashSet<&str> = planned
        .iter()
        .map(|p| p.entry.current_id.as_str())
        .collect();
    let displaced: Vec<String> = planned
        .iter()
        .filter(|p| !sources.contains(p.entry.corrected_id.as_str()))
        .filter_map(|p| {
            p.replaced
                .as_ref()
                .map(|record| format!("'{}' (bound to '{record}')", p.entry.corrected_id))
        })
        .collect();
    if displaced.is_empty() {
        Ok(())
    } else {
        Err(IdPoolError::validation(format!(
            "corrected_id already bound to a record that this batch does not move: {}",
            displaced.join(", ")
        )))
    }
}

fn stage(tx: &Transaction, project: &ProjectId, planned: &[Planned<'_>]) -> Result<()> {
    let mut stmt = tx.prepare(
        "UPDATE identifiers
         SET staged_record_key = record_key, record_key = NULL
         WHERE project_id = ?1 AND identifier = ?2",
    )?;
    let mut staged = 0usize;
    for p in planned {
        staged += stmt.execute(params![project.as_str(), p.entry.current_id])?;
    }
    tracing::debug!(project = %project, staged, "phase 1 complete");
    Ok(())
}

fn commit(tx: &Transaction, project: &ProjectId, planned: &[Planned<'_>]) -> Result<()> {
    let mut stmt = tx.prepare(
        "UPDATE identifiers
         SET record_key = (
             SELECT src.staged_record_key FROM identifiers AS src
             WHERE src.project_id = ?1 AND src.identifier = ?2
         )
         WHERE project_id = ?1 AND identifier = ?3",
    )?;
    let mut moved = 0usize;
    for p in planned {
        moved += stmt.execute(params![
            project.as_str(),
            p.entry.current_id,
            p.entry.corrected_id
        ])?;
    }
    let cleared = tx.execute(
        "UPDATE identifiers SET staged_record_key = NULL
         WHERE project_id = ?1 AND staged_record_key IS NOT NULL",
        params![project.as_str()],
    )?;
    tracing::debug!(project = %project, moved, cleared, "phase 2 complete");
    Ok(())
}

fn verify<F>(
    tx: &Transaction,
    project: &ProjectId,
    planned: &[Planned<'_>],
    check: &F,
) -> Result<()>
where
    F: Fn(&CorrectionEntry, Option<&str>, Option<&str>) -> bool,
{
    let mut failures = Vec::new();
    for p in planned {
        let found = lookup(tx, project, &p.entry.corrected_id)?.flatten();
        if check(p.entry, p.moving.as_deref(), found.as_deref()) {
            tracing::debug!(
                project = %project,
                to = %p.entry.corrected_id,
                from = %p.entry.current_id,
                "[PASS] correction verified"
            );
        } else {
            tracing::error!(
                project = %project,
                from = %p.entry.current_id,
                to = %p.entry.corrected_id,
                expected = p.moving.as_deref().unwrap_or("<unbound>"),
                found = found.as_deref().unwrap_or("<unbound>"),
                "[FAIL] correction post-condition"
            );
            failures.push(PostconditionFailure {
                current_id: p.entry.current_id.clone(),
                corrected_id: p.entry.corrected_id.clone(),
                expected_record: p.moving.clone(),
                found_record: found,
            });
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(IdPoolError::Consistency { failures })
    }
}

/// Sources that gave their record away and received none: `(identifier, record)`.
fn released_sources(planned: &[Planned<'_>]) -> Vec<(String, String)> {
    let destinations: HashSet<&str> = planned
        .iter()
        .map(|p| p.entry.corrected_id.as_str())
        .collect();
    planned
        .iter()
        .filter(|p| !destinations.contains(p.entry.current_id.as_str()))
        .filter_map(|p| {
            p.moving
                .as_ref()
                .map(|record| (p.entry.current_id.clone(), record.clone()))
        })
        .collect()
}
