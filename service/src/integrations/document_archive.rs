use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use booster_idpool::ProjectId;
use chrono::{Local, NaiveDateTime};

use super::{ProjectTable, ensure_path_component};
use crate::config::{self, ProjectSettings};
use crate::errors::IntegrationError;
use crate::integration::{Integration, Outcome};
use crate::notification::DispatchContext;
use crate::redcap::RedcapClient;

/// Exports the submitted record as a PDF and files it under
/// `<archive_dir>/<dag folder>/<record>/<record>_<timestamp>.pdf`.
#[derive(Debug)]
pub struct DocumentArchive {
    table: ProjectTable,
    redcap: RedcapClient,
}

impl DocumentArchive {
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
}

/// Where the PDF of `record` exported at `at` is filed.
fn archive_path(
    settings: &ProjectSettings,
    dag: Option<&str>,
    record: &str,
    at: NaiveDateTime,
) -> Result<PathBuf, IntegrationError> {
    let root = settings
        .archive_dir
        .as_deref()
        .ok_or_else(|| IntegrationError::Payload("archive_dir is not configured".to_string()))?;
    let dag = dag.ok_or_else(|| {
        IntegrationError::Payload("record has no data access group".to_string())
    })?;
    let folder = settings
        .dags
        .get(dag)
        .ok_or_else(|| IntegrationError::Payload(format!("no archive folder for DAG '{dag}'")))?;
    ensure_path_component(record)?;
    ensure_path_component(folder)?;

    let filename = format!("{record}_{}.pdf", at.format("%Y-%m-%dT%H%M%S"));
    Ok(config::expand_home(root)
        .join(folder)
        .join(record)
        .join(filename))
}

#[async_trait]
impl Integration for DocumentArchive {
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
        let path = archive_path(
            settings,
            ctx.data_access_group.as_deref(),
            &ctx.record,
            Local::now().naive_local(),
        )?;

        let pdf = self.redcap.export_pdf(&ctx.project, &ctx.record).await?;

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
            path = %path.display(),
            bytes = pdf.len(),
            "record PDF archived"
        );
        Ok(Outcome::Completed {
            detail: path.display().to_string(),
        })
    }
}
