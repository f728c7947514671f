//! Built-in integrations

mod document_archive;
mod id_gen;
mod report_merge;
mod token_bundle;

use std::collections::HashMap;
use std::path::Path;

use booster_idpool::ProjectId;

use crate::config::ProjectSettings;
use crate::errors::IntegrationError;

pub use document_archive::DocumentArchive;
pub use id_gen::IdGen;
pub use report_merge::ReportMerge;
pub use token_bundle::TokenBundle;

/// Per-project settings of one integration.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProjectTable {
    service: String,
    projects: HashMap<ProjectId, ProjectSettings>,
}

impl ProjectTable {
    pub(crate) fn new(service: &str, projects: HashMap<ProjectId, ProjectSettings>) -> Self {
        Self {
            service: service.to_string(),
            projects,
        }
    }

    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn ids(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.projects.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn is_interested(&self, project: &ProjectId, instrument: &str) -> bool {
        self.projects
            .get(project)
            .is_some_and(|s| s.triggers_on(instrument))
    }

    pub(crate) fn get(&self, project: &ProjectId) -> Result<&ProjectSettings, IntegrationError> {
        self.projects.get(project).ok_or_else(|| {
            IntegrationError::Payload(format!(
                "project {project} is not configured for {}",
                self.service
            ))
        })
    }
}

/// Reject anything but a single, ordinary path component.
pub(crate) fn ensure_path_component(value: &str) -> Result<(), IntegrationError> {
    let single = Path::new(value).components().count() == 1;
    if value.is_empty() || value == "." || value == ".." || !single || value.contains(['/', '\\']) {
        return Err(IntegrationError::Payload(format!(
            "'{value}' cannot be used as an archive folder name"
        )));
    }
    Ok(())
}
