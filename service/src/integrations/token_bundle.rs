use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use booster_idpool::{IdentifierStore, ProjectId};

use super::ProjectTable;
use crate::config::ProjectSettings;
use crate::errors::IntegrationError;
use crate::integration::{Integration, Outcome};
use crate::notification::DispatchContext;
use crate::redcap::RedcapClient;

/// REDCap's "Complete" form status.
const FORM_COMPLETE: &str = "2";

/// Pool entries are comma-separated token bundles (one pre-provisioned
/// interview per field group). The bundle assigned to a record is split and
/// written to `token_fields` in order.
#[derive(Debug)]
pub struct TokenBundle {
    table: ProjectTable,
    store: IdentifierStore,
    redcap: RedcapClient,
}

impl TokenBundle {
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

/// Build the write-back row for one bundle.
fn bundle_row(
    settings: &ProjectSettings,
    record: &str,
    bundle: &str,
) -> Result<BTreeMap<String, String>, IntegrationError> {
    let tokens: Vec<&str> = bundle.split(',').map(str::trim).collect();
    if tokens.len() != settings.token_fields.len() {
        // The entry stays bound to the record; name it so it can be
        // moved to a good bundle with `rbutils id-gen correct`.
        return Err(IntegrationError::Payload(format!(
            "token bundle '{bundle}' bound to record {record} has {} values but {} token fields are configured",
            tokens.len(),
            settings.token_fields.len()
        )));
    }

    let mut row: BTreeMap<String, String> = settings
        .token_fields
        .iter()
        .cloned()
        .zip(tokens.into_iter().map(str::to_string))
        .collect();
    row.insert(settings.record_id_field.clone(), record.to_string());
    if let Some(complete) = &settings.complete_field {
        row.insert(complete.clone(), FORM_COMPLETE.to_string());
    }
    Ok(row)
}

#[async_trait]
impl Integration for TokenBundle {
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
        let Some(bundle) = self
            .store
            .get_or_allocate_async(ctx.project.clone(), ctx.record.clone())
            .await?
        else {
            return Ok(Outcome::Deferred {
                reason: "token pool exhausted".to_string(),
            });
        };

        let row = bundle_row(settings, &ctx.record, &bundle)?;
        self.redcap.import_records(&ctx.project, &[row]).await?;

        tracing::info!(
            service = self.name(),
            project = %ctx.project,
            record = %ctx.record,
            fields = settings.token_fields.len(),
            "token bundle written back"
        );
        Ok(Outcome::Completed {
            detail: format!("{} tokens written", settings.token_fields.len()),
        })
    }
}
