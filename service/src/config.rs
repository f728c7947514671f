//! Booster configuration loading
//!
//! Loads configuration from `--config`, else `BOOSTER_CONFIG`, else
//! `~/.config/redcap-booster/booster.toml`. A missing default file yields the
//! default configuration (no services).
//!
//! ```toml
//! listen = "127.0.0.1:8000"
//! data_dir = "~/.local/share/redcap-booster"
//! secret = "shared"
//!
//! [redcap]
//! url = "https://redcap.example.edu"
//!
//! [tokens]
//! "16894" = "API-TOKEN"
//!
//! [secrets]
//! "16894" = "project-secret"
//!
//! [services.id_gen]
//! kind = "id_gen"
//!
//! [services.id_gen.projects.16894]
//! id_field = "study_id"
//! instruments = ["enrollment"]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use booster_idpool::ProjectId;
use serde::Deserialize;

use crate::errors::{Result, ServiceError};

/// Root configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BoosterConfig {
    /// Address the webhook server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory holding one identifier database per pool service
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Global shared secret expected on every notification
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub redcap: RedcapConfig,

    /// REDCap API tokens keyed by project id
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,

    /// Per-project shared secrets; override `secret` for that project
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_data_dir() -> String {
    "~/.local/share/redcap-booster".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedcapConfig {
    /// Base URL of the REDCap instance (the API lives at `<url>/api/`)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RedcapConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Assign a pool identifier and write it back to the record
    IdGen,
    /// Assign a pool entry holding comma-separated tokens and write each
    /// token to its own field
    TokenBundle,
    /// Archive the record's PDF under a per-DAG folder
    DocumentArchive,
    /// Merge report PDFs from the record's project, a linked project and
    /// an optional external report service into one archived PDF
    ReportMerge,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdGen => "id_gen",
            Self::TokenBundle => "token_bundle",
            Self::DocumentArchive => "document_archive",
            Self::ReportMerge => "report_merge",
        }
    }

    /// Whether the service draws from an identifier pool
    pub fn uses_pool(&self) -> bool {
        matches!(self, Self::IdGen | Self::TokenBundle)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub kind: ServiceKind,

    /// Identifier database; defaults to `<data_dir>/<service>.db`
    #[serde(default)]
    pub db: Option<String>,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectSettings>,
}

/// Settings for one project of one service.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Instruments that trigger the service; empty means every instrument
    #[serde(default)]
    pub instruments: Vec<String>,

    /// Name of the project's record id field
    #[serde(default = "default_record_id_field")]
    pub record_id_field: String,

    /// `id_gen`: field receiving the assigned identifier
    #[serde(default)]
    pub id_field: Option<String>,

    /// `token_bundle`: fields receiving the bundle's tokens, in order
    #[serde(default)]
    pub token_fields: Vec<String>,

    /// `token_bundle`: form status field set to complete (2) on write-back
    #[serde(default)]
    pub complete_field: Option<String>,

    /// `document_archive`, `report_merge`: root directory of the archive
    #[serde(default)]
    pub archive_dir: Option<String>,

    /// `document_archive`: data access group name to folder name
    #[serde(default)]
    pub dags: BTreeMap<String, String>,

    /// `report_merge`: instrument whose PDF closes the merged report
    #[serde(default)]
    pub report_form: Option<String>,

    /// `report_merge`: project holding the participant's linked record
    #[serde(default)]
    pub linked_project: Option<String>,

    /// `report_merge`: record id field of the linked project
    #[serde(default = "default_record_id_field")]
    pub linked_record_id_field: String,

    /// `report_merge`: linked project field holding this project's record id
    #[serde(default)]
    pub linked_study_id_field: Option<String>,

    /// `report_merge`: linked project field naming the participant's group
    #[serde(default)]
    pub group_field: Option<String>,

    /// `report_merge`: groups (as labels) that get no merged report
    #[serde(default)]
    pub excluded_groups: Vec<String>,

    /// `report_merge`: instrument whose PDF opens the merged report
    #[serde(default)]
    pub linked_report_form: Option<String>,

    /// `report_merge`: base URL of the external report service; reports are
    /// fetched from `<url>/report/<id>?key=<key>`
    #[serde(default)]
    pub external_report_url: Option<String>,

    #[serde(default)]
    pub external_report_key: Option<String>,

    /// `report_merge`: field holding the external report id
    #[serde(default)]
    pub external_report_id_field: Option<String>,

    /// `report_merge`: event the external report id is read from
    #[serde(default)]
    pub external_report_event: Option<String>,
}

fn default_record_id_field() -> String {
    "record_id".to_string()
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            record_id_field: default_record_id_field(),
            id_field: None,
            token_fields: Vec::new(),
            complete_field: None,
            archive_dir: None,
            dags: BTreeMap::new(),
            report_form: None,
            linked_project: None,
            linked_record_id_field: default_record_id_field(),
            linked_study_id_field: None,
            group_field: None,
            excluded_groups: Vec::new(),
            linked_report_form: None,
            external_report_url: None,
            external_report_key: None,
            external_report_id_field: None,
            external_report_event: None,
        }
    }
}

impl ProjectSettings {
    /// Whether a submission of `instrument` should trigger the service.
    pub fn triggers_on(&self, instrument: &str) -> bool {
        self.instruments.is_empty() || self.instruments.iter().any(|i| i == instrument)
    }
}

/// A project's settings together with the service they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProjectConfig {
    pub service: String,
    pub kind: ServiceKind,
    pub settings: ProjectSettings,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            secret: None,
            redcap: RedcapConfig::default(),
            tokens: BTreeMap::new(),
            secrets: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }
}

impl BoosterConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "BOOSTER_CONFIG";

    /// Environment variable overriding the global shared secret
    pub const ENV_SHARED_SECRET: &'static str = "BOOSTER_SHARED_SECRET";

    /// Prefix of per-project API token variables (`BOOSTER_TOKEN_<pid>`)
    pub const ENV_TOKEN_PREFIX: &'static str = "BOOSTER_TOKEN_";

    pub const DEFAULT_CONFIG_FILENAME: &'static str = "booster.toml";

    /// Load configuration, then apply environment overrides.
    ///
    /// An explicit path must exist; the env/default paths fall back to the
    /// default configuration when the file is missing.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let path = Self::resolve_config_path();
                if path.exists() {
                    Self::load_from_path(&path)?
                } else {
                    tracing::info!(path = %path.display(), "booster config not found, using defaults");
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;
        tracing::debug!(path = %path.display(), "loaded booster config");
        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: BoosterConfig = toml::from_str(contents)
            .map_err(|e| ServiceError::config_with_source("failed to parse config", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("redcap-booster")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Apply `BOOSTER_SHARED_SECRET` and `BOOSTER_TOKEN_<pid>` for every
    /// configured or linked project. `lookup` resolves an environment
    /// variable.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(Self::ENV_SHARED_SECRET) {
            self.secret = Some(secret);
        }

        let mut pids: Vec<String> = self
            .services
            .values()
            .flat_map(|s| {
                s.projects
                    .iter()
                    .flat_map(|(pid, settings)| {
                        std::iter::once(pid.clone()).chain(settings.linked_project.clone())
                    })
            })
            .collect();
        pids.sort();
        pids.dedup();
        for pid in pids {
            if let Some(token) = lookup(&format!("{}{pid}", Self::ENV_TOKEN_PREFIX)) {
                self.tokens.insert(pid, token);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, service) in &self.services {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(ServiceError::config(format!(
                    "invalid service name '{name}': use letters, digits, '_' or '-'"
                )));
            }

            for (pid, settings) in &service.projects {
                ProjectId::new(pid.as_str()).map_err(|e| {
                    ServiceError::config(format!("services.{name}.projects: {e}"))
                })?;
                validate_project(name, pid, service.kind, settings)?;
            }
        }

        for pid in self.tokens.keys().chain(self.secrets.keys()) {
            ProjectId::new(pid.as_str())
                .map_err(|e| ServiceError::config(format!("tokens/secrets: {e}")))?;
        }

        if let Some(url) = &self.redcap.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ServiceError::config(format!(
                "redcap.url must be an http(s) URL, got '{url}'"
            )));
        }

        if !self.services.is_empty() && self.secret.is_none() && self.secrets.is_empty() {
            tracing::warn!("no shared secret configured; every notification will be rejected");
        }

        Ok(())
    }

    /// Every configured `(service, project)` pair.
    pub fn project_settings(&self) -> Result<HashMap<(String, ProjectId), ServiceProjectConfig>> {
        let mut resolved = HashMap::new();
        for (name, service) in &self.services {
            for (pid, settings) in &service.projects {
                let project = ProjectId::new(pid.as_str())
                    .map_err(|e| ServiceError::config(e.to_string()))?;
                resolved.insert(
                    (name.clone(), project),
                    ServiceProjectConfig {
                        service: name.clone(),
                        kind: service.kind,
                        settings: settings.clone(),
                    },
                );
            }
        }
        Ok(resolved)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Identifier database of `service`.
    pub fn db_path(&self, service: &str) -> Result<PathBuf> {
        let cfg = self
            .services
            .get(service)
            .ok_or_else(|| ServiceError::config(format!("service '{service}' is not configured")))?;
        if !cfg.kind.uses_pool() {
            return Err(ServiceError::config(format!(
                "service '{service}' ({}) does not use an identifier pool",
                cfg.kind.as_str()
            )));
        }
        Ok(match &cfg.db {
            Some(db) => expand_home(db),
            None => self.resolved_data_dir().join(format!("{service}.db")),
        })
    }

    /// Secret expected from `project`: its own if configured, else the
    /// global one.
    pub fn secret_for(&self, project: Option<&str>) -> Option<&str> {
        project
            .and_then(|p| self.secrets.get(p))
            .or(self.secret.as_ref())
            .map(String::as_str)
    }
}

fn validate_project(
    service: &str,
    pid: &str,
    kind: ServiceKind,
    settings: &ProjectSettings,
) -> Result<()> {
    let missing = |field: &str| {
        ServiceError::config(format!(
            "services.{service}.projects.{pid}: {} requires '{field}'",
            kind.as_str()
        ))
    };
    match kind {
        ServiceKind::IdGen => {
            if settings.id_field.as_deref().is_none_or(str::is_empty) {
                return Err(missing("id_field"));
            }
        }
        ServiceKind::TokenBundle => {
            if settings.token_fields.is_empty() {
                return Err(missing("token_fields"));
            }
        }
        ServiceKind::DocumentArchive => {
            if settings.archive_dir.is_none() {
                return Err(missing("archive_dir"));
            }
            if settings.dags.is_empty() {
                return Err(missing("dags"));
            }
        }
        ServiceKind::ReportMerge => {
            if settings.archive_dir.is_none() {
                return Err(missing("archive_dir"));
            }
            let linked = settings
                .linked_project
                .as_deref()
                .ok_or_else(|| missing("linked_project"))?;
            ProjectId::new(linked).map_err(|e| {
                ServiceError::config(format!(
                    "services.{service}.projects.{pid}: linked_project: {e}"
                ))
            })?;
            for (field, value) in [
                ("linked_study_id_field", &settings.linked_study_id_field),
                ("linked_report_form", &settings.linked_report_form),
                ("report_form", &settings.report_form),
            ] {
                if value.as_deref().is_none_or(str::is_empty) {
                    return Err(missing(field));
                }
            }
            if settings.external_report_url.is_some()
                && (settings.external_report_key.is_none()
                    || settings.external_report_id_field.is_none())
            {
                return Err(ServiceError::config(format!(
                    "services.{service}.projects.{pid}: external_report_url requires \
                     'external_report_key' and 'external_report_id_field'"
                )));
            }
        }
    }
    Ok(())
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
