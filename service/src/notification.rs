//! Data Entry Trigger payloads
//!
//! REDCap posts `application/x-www-form-urlencoded` bodies. The completion
//! field is named after the instrument (`<instrument>_complete`), so the
//! whole form is kept alongside the parsed fields.

use std::collections::HashMap;

use booster_idpool::ProjectId;

use crate::errors::WebhookError;

/// A parsed notification, shared by every integration that handles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub project: ProjectId,
    pub record: String,
    pub instrument: String,
    pub redcap_url: Option<String>,
    pub project_url: Option<String>,
    pub event_name: Option<String>,
    pub data_access_group: Option<String>,
    pub repeat_instance: Option<String>,
    /// Every form field as received
    pub fields: HashMap<String, String>,
}

impl DispatchContext {
    pub fn from_form(fields: HashMap<String, String>) -> Result<Self, WebhookError> {
        let required = |name: &str| -> Result<String, WebhookError> {
            fields
                .get(name)
                .map(String::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| WebhookError::InvalidPayload(format!("missing field '{name}'")))
        };
        let optional = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let project = ProjectId::new(required("project_id")?)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let record = required("record")?;
        let instrument = required("instrument")?;

        Ok(Self {
            project,
            record,
            instrument,
            redcap_url: optional("redcap_url"),
            project_url: optional("project_url"),
            event_name: optional("redcap_event_name"),
            data_access_group: optional("redcap_data_access_group"),
            repeat_instance: optional("redcap_repeat_instance"),
            fields,
        })
    }

    /// Whether the notification came from the REDCap instance at `base_url`.
    /// Notifications that omit `redcap_url` are accepted.
    pub fn is_from(&self, base_url: &str) -> bool {
        self.redcap_url
            .as_deref()
            .is_none_or(|url| normalize_url(url) == normalize_url(base_url))
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}
