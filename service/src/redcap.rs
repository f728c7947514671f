//! Minimal REDCap API client
//!
//! Only the calls the built-in integrations make: importing and exporting
//! records (`content=record`) and exporting PDFs (`content=pdf`). Every call
//! is a form POST to `<base>/api/` carrying the project's API token, so one
//! client serves every project with a configured token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use booster_idpool::ProjectId;
use serde::Deserialize;

use crate::config::BoosterConfig;
use crate::errors::{IntegrationError, ServiceError};

#[derive(Debug, Deserialize)]
struct ImportResponse {
    count: serde_json::Value,
}

#[derive(Clone)]
pub struct RedcapClient {
    http: reqwest::Client,
    base_url: String,
    api_url: String,
    tokens: Arc<BTreeMap<String, String>>,
}

impl std::fmt::Debug for RedcapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedcapClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RedcapClient {
    pub fn new(
        base_url: &str,
        tokens: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::config_with_source("failed to build HTTP client", e))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            api_url: format!("{base_url}/api/"),
            base_url,
            tokens: Arc::new(tokens),
        })
    }

    pub fn from_config(config: &BoosterConfig) -> Result<Self, ServiceError> {
        let url = config
            .redcap
            .url
            .as_deref()
            .ok_or_else(|| ServiceError::config("redcap.url is required to run the service"))?;
        Self::new(
            url,
            config.tokens.clone(),
            Duration::from_secs(config.redcap.timeout_secs),
        )
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn token(&self, project: &ProjectId) -> Result<&str, IntegrationError> {
        self.tokens
            .get(project.as_str())
            .map(String::as_str)
            .ok_or_else(|| IntegrationError::MissingToken {
                project: project.clone(),
            })
    }

    async fn post(
        &self,
        project: &ProjectId,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response, IntegrationError> {
        let token = self.token(project)?;
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        form.push(("token", token));
        form.extend_from_slice(params);

        let response = self
            .http
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| IntegrationError::redcap_with_source("request failed", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(IntegrationError::redcap(format!("HTTP {status}: {}", body.trim())))
        }
    }

    /// Import (create or update) flat records. Returns the count REDCap
    /// reports.
    pub async fn import_records(
        &self,
        project: &ProjectId,
        rows: &[BTreeMap<String, String>],
    ) -> Result<u64, IntegrationError> {
        let data = serde_json::to_string(rows)
            .map_err(|e| IntegrationError::redcap_with_source("failed to encode records", e))?;
        let response = self
            .post(
                project,
                &[
                    ("content", "record"),
                    ("format", "json"),
                    ("type", "flat"),
                    ("overwriteBehavior", "normal"),
                    ("returnContent", "count"),
                    ("returnFormat", "json"),
                    ("data", &data),
                ],
            )
            .await?;

        let parsed: ImportResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::redcap_with_source("unexpected import response", e))?;
        let count = match &parsed.count {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            IntegrationError::redcap(format!("unexpected import count {}", parsed.count))
        })?;

        tracing::debug!(project = %project, count, "records imported");
        Ok(count)
    }

    /// Export flat records with labels instead of raw codes. Empty slices
    /// mean every record, field or event.
    pub async fn export_records(
        &self,
        project: &ProjectId,
        records: &[&str],
        fields: &[&str],
        events: &[&str],
    ) -> Result<Vec<BTreeMap<String, String>>, IntegrationError> {
        let mut params: Vec<(String, &str)> = vec![
            ("content".to_string(), "record"),
            ("format".to_string(), "json"),
            ("type".to_string(), "flat"),
            ("rawOrLabel".to_string(), "label"),
            ("returnFormat".to_string(), "json"),
        ];
        for (name, values) in [("records", records), ("fields", fields), ("events", events)] {
            params.extend(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, value)| (format!("{name}[{i}]"), *value)),
            );
        }
        let form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), *v)).collect();

        let rows: Vec<BTreeMap<String, String>> = self
            .post(project, &form)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::redcap_with_source("unexpected export response", e))?;
        tracing::debug!(project = %project, rows = rows.len(), "records exported");
        Ok(rows)
    }

    /// PDF of every instrument of `record`, compact display.
    pub async fn export_pdf(
        &self,
        project: &ProjectId,
        record: &str,
    ) -> Result<Vec<u8>, IntegrationError> {
        self.pdf(
            project,
            &[
                ("content", "pdf"),
                ("record", record),
                ("compactDisplay", "TRUE"),
                ("returnFormat", "json"),
            ],
        )
        .await
    }

    /// PDF of one instrument of `record`.
    pub async fn export_instrument_pdf(
        &self,
        project: &ProjectId,
        record: &str,
        instrument: &str,
    ) -> Result<Vec<u8>, IntegrationError> {
        self.pdf(
            project,
            &[
                ("content", "pdf"),
                ("record", record),
                ("instrument", instrument),
                ("returnFormat", "json"),
            ],
        )
        .await
    }

    async fn pdf(
        &self,
        project: &ProjectId,
        params: &[(&str, &str)],
    ) -> Result<Vec<u8>, IntegrationError> {
        let bytes = self
            .post(project, params)
            .await?
            .bytes()
            .await
            .map_err(|e| IntegrationError::redcap_with_source("failed to read PDF", e))?;
        Ok(bytes.to_vec())
    }

    /// GET a document from a service outside REDCap, reusing this client's
    /// connection pool and timeout. `query` is never logged.
    pub async fn fetch_document(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<u8>, IntegrationError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                IntegrationError::redcap_with_source(format!("GET {url} failed"), e.without_url())
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(IntegrationError::redcap(format!("GET {url}: HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| {
                IntegrationError::redcap_with_source(format!("failed to read {url}"), e.without_url())
            })?;
        Ok(bytes.to_vec())
    }
}
