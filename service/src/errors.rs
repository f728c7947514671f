//! Service error types
//!
//! - [`ServiceError`]: startup failures (configuration, opening pools)
//! - [`IntegrationError`]: one integration failed to handle a notification
//! - [`WebhookError`]: a notification was rejected before dispatch; maps to
//!   an HTTP status

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booster_idpool::{IdPoolError, ProjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("identifier pool error: {0}")]
    Pool(#[from] IdPoolError),
}

impl ServiceError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("identifier pool error: {0}")]
    Pool(#[from] IdPoolError),

    #[error("no API token configured for project {project}")]
    MissingToken { project: ProjectId },

    #[error("REDCap API error: {message}")]
    Redcap {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The notification or pool data does not fit the integration's settings.
    #[error("unusable payload: {0}")]
    Payload(String),

    #[error("archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl IntegrationError {
    pub fn redcap(message: impl Into<String>) -> Self {
        Self::Redcap {
            message: message.into(),
            source: None,
        }
    }

    pub fn redcap_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Redcap {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn archive_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Archive {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Reasons a notification is refused before any integration runs.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing shared secret")]
    MissingSecret,

    #[error("invalid shared secret")]
    InvalidSecret,

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No integration (or not the addressed one) is configured for the project.
    #[error("project {0} is not configured")]
    ProjectNotConfigured(String),

    #[error("notification came from an unexpected REDCap instance: {0}")]
    ForeignInstance(String),
}

impl WebhookError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSecret | Self::InvalidSecret => StatusCode::UNAUTHORIZED,
            Self::UnknownService(_) => StatusCode::NOT_FOUND,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::ProjectNotConfigured(_) | Self::ForeignInstance(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Secrets and configured project ids never appear in the body.
        let body = match &self {
            Self::MissingSecret => "Missing secret",
            Self::InvalidSecret => "Invalid secret",
            Self::UnknownService(_) => "Not Found",
            Self::InvalidPayload(_) => "Invalid payload",
            Self::ProjectNotConfigured(_) | Self::ForeignInstance(_) => "Forbidden",
        };
        (self.status_code(), body).into_response()
    }
}
