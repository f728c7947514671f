use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use booster_idpool::ProjectId;
use chrono::{Local, NaiveDateTime};
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};

use super::{ProjectTable, ensure_path_component};
use crate::config::{self, ProjectSettings};
use crate::errors::IntegrationError;
use crate::integration::{Integration, Outcome};
use crate::notification::DispatchContext;
use crate::redcap::RedcapClient;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITED_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Builds one report PDF for a participant and files it under
/// `<archive_dir>/<record>/<record>_<timestamp>.pdf`.
///
/// The participant is matched to a record of `linked_project` whose
/// `linked_study_id_field` holds this project's record id. The merged
/// report holds the linked record's `linked_report_form`, then the external
/// report (when configured and available), then the record's own
/// `report_form`.
#[derive(Debug)]
pub struct ReportMerge {
    table: ProjectTable,
    redcap: RedcapClient,
}

/// The linked project's view of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkedParticipant {
    record: String,
    group: Option<String>,
}

impl ReportMerge {
    pub fn new(
        name: &str,
        redcap: RedcapClient,
        projects: HashMap<ProjectId, ProjectSettings>,
    ) -> Self {
        Self {
            table: ProjectTable::new(name, projects),
            redcap,
        }
    }

    async fn external_report(
        &self,
        settings: &ProjectSettings,
        ctx: &DispatchContext,
    ) -> Result<Option<Vec<u8>>, IntegrationError> {
        let (Some(url), Some(key), Some(id_field)) = (
            settings.external_report_url.as_deref(),
            settings.external_report_key.as_deref(),
            settings.external_report_id_field.as_deref(),
        ) else {
            return Ok(None);
        };

        let events: Vec<&str> = settings.external_report_event.as_deref().into_iter().collect();
        let rows = self
            .redcap
            .export_records(&ctx.project, &[ctx.record.as_str()], &[id_field], &events)
            .await?;
        let Some(report_id) = rows
            .iter()
            .find_map(|row| row.get(id_field).filter(|v| !v.is_empty()))
        else {
            tracing::debug!(record = %ctx.record, "no external report id recorded");
            return Ok(None);
        };
        if !report_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(IntegrationError::Payload(format!(
                "external report id '{report_id}' is not a plain identifier"
            )));
        }

        let url = format!("{}/report/{report_id}", url.trim_end_matches('/'));
        let pdf = self.redcap.fetch_document(&url, &[("key", key)]).await?;
        Ok(Some(pdf))
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, IntegrationError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IntegrationError::Payload(format!("{name} is not configured")))
}

/// The most recent linked record naming `record`. Exports come back in
/// creation order, so the search runs from the end.
fn find_linked(
    rows: &[BTreeMap<String, String>],
    settings: &ProjectSettings,
    study_id_field: &str,
    record: &str,
) -> Option<LinkedParticipant> {
    rows.iter()
        .rev()
        .find(|row| row.get(study_id_field).is_some_and(|v| v == record))
        .and_then(|row| {
            let linked = row.get(&settings.linked_record_id_field)?;
            Some(LinkedParticipant {
                record: linked.clone(),
                group: settings
                    .group_field
                    .as_ref()
                    .and_then(|field| row.get(field))
                    .cloned(),
            })
        })
}

fn archive_path(
    settings: &ProjectSettings,
    record: &str,
    at: NaiveDateTime,
) -> Result<PathBuf, IntegrationError> {
    let root = required(&settings.archive_dir, "archive_dir")?;
    ensure_path_component(record)?;
    let filename = format!("{record}_{}.pdf", at.format("%Y-%m-%dT%H%M%S"));
    Ok(config::expand_home(root).join(record).join(filename))
}

/// Concatenate the pages of `parts` in order. Parts that do not parse as
/// PDF are skipped; `None` when no part contributed a page.
fn merge_pdfs(parts: &[Vec<u8>]) -> Result<Option<Vec<u8>>, IntegrationError> {
    let mut merged = Document::with_version("1.5");
    let pages_id = merged.new_object_id();
    let mut next_id = pages_id.0 + 1;
    let mut kids: Vec<Object> = Vec::new();

    for (index, part) in parts.iter().enumerate() {
        let mut doc = match Document::load_mem(part) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(part = index, error = %e, "skipping unreadable PDF");
                continue;
            }
        };
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages = match flattened_pages(&doc) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(part = index, error = %e, "skipping PDF with a broken page tree");
                continue;
            }
        };
        for (id, object) in doc.objects {
            if !is_page_tree_node(&object) {
                merged.objects.insert(id, object);
            }
        }
        for (id, mut page) in pages {
            page.set("Parent", pages_id);
            merged.objects.insert(id, Object::Dictionary(page));
            kids.push(Object::Reference(id));
        }
    }

    if kids.is_empty() {
        return Ok(None);
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    merged.max_id = next_id - 1;
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    merged
        .save_to(&mut out)
        .map_err(|e| IntegrationError::archive_with_source("failed to write merged PDF", e))?;
    Ok(Some(out))
}

/// Every page of `doc` in order, detached from its page tree with the
/// attributes it inherited copied onto it.
fn flattened_pages(doc: &Document) -> lopdf::Result<Vec<(ObjectId, Dictionary)>> {
    let mut pages = Vec::new();
    for page_id in doc.get_pages().into_values() {
        let mut page = doc.get_dictionary(page_id)?.clone();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        for _ in 0..MAX_PAGE_TREE_DEPTH {
            let Some(node_id) = parent else {
                break;
            };
            let node = doc.get_dictionary(node_id)?;
            for key in INHERITED_PAGE_KEYS {
                if !page.has(key)
                    && let Ok(value) = node.get(key)
                {
                    page.set(key.to_vec(), value.clone());
                }
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
        page.remove(b"Parent");
        pages.push((page_id, page));
    }
    Ok(pages)
}

fn is_page_tree_node(object: &Object) -> bool {
    object
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Type").ok())
        .and_then(|kind| kind.as_name().ok())
        .is_some_and(|name| matches!(name, b"Catalog" | b"Pages" | b"Page"))
}

#[async_trait]
impl Integration for ReportMerge {
    fn name(&self) -> &str {
        self.table.service()
    }

    fn projects(&self) -> Vec<ProjectId> {
        self.table.ids()
    }

    fn is_interested(&self, project: &ProjectId, instrument: &str) -> bool {
        self.table.is_interested(project, instrument)
    }

    async fn handle(&self, ctx: &DispatchContext) -> Result<Outcome, IntegrationError> {
        let settings = self.table.get(&ctx.project)?;
        let linked_project = ProjectId::new(required(&settings.linked_project, "linked_project")?)
            .map_err(|e| IntegrationError::Payload(e.to_string()))?;
        let study_id_field = required(&settings.linked_study_id_field, "linked_study_id_field")?;
        let linked_form = required(&settings.linked_report_form, "linked_report_form")?;
        let report_form = required(&settings.report_form, "report_form")?;

        let mut fields = vec![settings.linked_record_id_field.as_str(), study_id_field];
        if let Some(group) = settings.group_field.as_deref() {
            fields.push(group);
        }
        let rows = self
            .redcap
            .export_records(&linked_project, &[], &fields, &[])
            .await?;
        let Some(participant) = find_linked(&rows, settings, study_id_field, &ctx.record) else {
            return Ok(Outcome::Deferred {
                reason: format!("no record in project {linked_project} links to {}", ctx.record),
            });
        };
        if let Some(group) = participant.group.as_deref()
            && settings.excluded_groups.iter().any(|g| g == group)
        {
            tracing::info!(
                service = self.name(),
                project = %ctx.project,
                record = %ctx.record,
                group,
                "group gets no merged report"
            );
            return Ok(Outcome::Completed {
                detail: format!("skipped: group {group}"),
            });
        }

        let path = archive_path(settings, &ctx.record, Local::now().naive_local())?;

        let mut parts = Vec::with_capacity(3);
        parts.push(
            self.redcap
                .export_instrument_pdf(&linked_project, &participant.record, linked_form)
                .await?,
        );
        match self.external_report(settings, ctx).await {
            Ok(Some(report)) => parts.push(report),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                service = self.name(),
                project = %ctx.project,
                record = %ctx.record,
                error = %e,
                "external report unavailable, merging without it"
            ),
        }
        parts.push(
            self.redcap
                .export_instrument_pdf(&ctx.project, &ctx.record, report_form)
                .await?,
        );

        let Some(pdf) = merge_pdfs(&parts)? else {
            return Err(IntegrationError::Payload(
                "none of the report PDFs could be read".to_string(),
            ));
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IntegrationError::archive_with_source(
                    format!("failed to create {}", parent.display()),
                    e,
                )
            })?;
        }
        tokio::fs::write(&path, &pdf).await.map_err(|e| {
            IntegrationError::archive_with_source(format!("failed to write {}", path.display()), e)
        })?;

        tracing::info!(
            service = self.name(),
            project = %ctx.project,
            record = %ctx.record,
            linked_record = %participant.record,
            parts = parts.len(),
            path = %path.display(),
            "merged report archived"
        );
        Ok(Outcome::Completed {
            detail: path.display().to_string(),
        })
    }
}
