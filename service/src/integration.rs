//! Integration capability and the static registry
//!
//! Integrations are built once at startup from configuration. The router
//! asks the registry which integrations want a notification and awaits each
//! of them in turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use booster_idpool::{IdentifierStore, ProjectId};
use serde::Serialize;

use crate::config::{BoosterConfig, ProjectSettings, ServiceKind};
use crate::errors::{IntegrationError, Result};
use crate::integrations::{DocumentArchive, IdGen, ReportMerge, TokenBundle};
use crate::notification::DispatchContext;
use crate::redcap::RedcapClient;

/// What an integration did with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The side effect happened
    Completed { detail: String },
    /// Nothing could be done yet (e.g. the pool is exhausted); a later
    /// notification for the same record will retry
    Deferred { reason: String },
}

#[async_trait]
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;

    /// Projects this integration is configured for.
    fn projects(&self) -> Vec<ProjectId>;

    fn is_interested(&self, project: &ProjectId, instrument: &str) -> bool;

    async fn handle(&self, ctx: &DispatchContext) -> std::result::Result<Outcome, IntegrationError>;
}

#[derive(Clone, Default)]
pub struct Registry {
    integrations: Vec<Arc<dyn Integration>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.integrations.iter().map(|i| i.name()))
            .finish()
    }
}

impl Registry {
    /// Build every configured service. Pool services open their identifier
    /// database here, so a bad path fails startup rather than a request.
    pub fn from_config(config: &BoosterConfig, redcap: &RedcapClient) -> Result<Self> {
        let mut by_service: HashMap<String, HashMap<ProjectId, ProjectSettings>> = HashMap::new();
        for ((service, project), resolved) in config.project_settings()? {
            by_service
                .entry(service)
                .or_default()
                .insert(project, resolved.settings);
        }

        let mut registry = Self::default();
        for (name, service) in &config.services {
            let projects = by_service.remove(name).unwrap_or_default();
            let integration: Arc<dyn Integration> = match service.kind {
                ServiceKind::IdGen => {
                    let store = IdentifierStore::open(&config.db_path(name)?)?;
                    Arc::new(IdGen::new(name, store, redcap.clone(), projects))
                }
                ServiceKind::TokenBundle => {
                    let store = IdentifierStore::open(&config.db_path(name)?)?;
                    Arc::new(TokenBundle::new(name, store, redcap.clone(), projects))
                }
                ServiceKind::DocumentArchive => {
                    Arc::new(DocumentArchive::new(name, redcap.clone(), projects))
                }
                ServiceKind::ReportMerge => {
                    Arc::new(ReportMerge::new(name, redcap.clone(), projects))
                }
            };
            tracing::info!(
                service = %name,
                kind = service.kind.as_str(),
                projects = service.projects.len(),
                "registered integration"
            );
            registry.register(integration);
        }
        Ok(registry)
    }

    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        self.integrations.push(integration);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Integration>> {
        self.integrations.iter().find(|i| i.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Integration>> {
        self.integrations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Whether any integration is configured for `project`.
    pub fn serves_project(&self, project: &ProjectId) -> bool {
        self.integrations
            .iter()
            .any(|i| i.projects().contains(project))
    }

    pub fn interested<'a>(
        &'a self,
        project: &'a ProjectId,
        instrument: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn Integration>> + 'a {
        self.integrations
            .iter()
            .filter(move |i| i.is_interested(project, instrument))
    }
}
