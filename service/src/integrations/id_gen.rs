use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use booster_idpool::{IdentifierStore, ProjectId};

use super::ProjectTable;
use crate::config::ProjectSettings;
use crate::errors::IntegrationError;
use crate::integration::{Integration, Outcome};
use crate::notification::DispatchContext;
use crate::redcap::RedcapClient;

/// Assigns the next pool identifier to a record and writes it to the
/// project's `id_field`.
///
/// Every notification for an already-assigned record writes the same
/// identifier again, so a lost write-back heals on the next save.
#[derive(Debug)]
pub struct IdGen {
    table: ProjectTable,
    store: IdentifierStore,
    redcap: RedcapClient,
}

impl IdGen {
    pub fn new(
        name: &str,
        store: IdentifierStore,
        redcap: RedcapClient,
        projects: HashMap<ProjectId, ProjectSettings>,
    ) -> Self {
        Self {
            table: ProjectTable::new(name, projects),
            store,
            redcap,
        }
    }
}

#[async_trait]
impl Integration for IdGen {
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
        let id_field = settings
            .id_field
            .as_deref()
            .ok_or_else(|| IntegrationError::Payload("id_field is not configured".to_string()))?;

        let Some(identifier) = self
            .store
            .get_or_allocate_async(ctx.project.clone(), ctx.record.clone())
            .await?
        else {
            return Ok(Outcome::Deferred {
                reason: "identifier pool exhausted".to_string(),
            });
        };

        let row = BTreeMap::from([
            (settings.record_id_field.clone(), ctx.record.clone()),
            (id_field.to_string(), identifier.clone()),
        ]);
        self.redcap.import_records(&ctx.project, &[row]).await?;

        tracing::info!(
            service = self.name(),
            project = %ctx.project,
            record = %ctx.record,
            identifier = %identifier,
            "identifier written back"
        );
        Ok(Outcome::Completed {
            detail: format!("{id_field}={identifier}"),
        })
    }
}
