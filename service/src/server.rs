//! Webhook server
//!
//! - `POST /`: dispatch to every interested integration
//! - `POST /{service}`: dispatch to one integration
//! - `GET /health`
//!
//! A notification is authenticated before anything else, then checked
//! against the configured projects and REDCap instance. Once accepted the
//! response is 200 with one result per integration, including failures.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::BoosterConfig;
use crate::errors::WebhookError;
use crate::integration::{Integration, Outcome, Registry};
use crate::notification::DispatchContext;

struct Inner {
    registry: Registry,
    config: BoosterConfig,
    redcap_url: String,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    pub fn new(registry: Registry, config: &BoosterConfig, redcap_url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                config: config.clone(),
                redcap_url: redcap_url.to_string(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

/// One integration's result for a notification.
#[derive(Debug, Serialize)]
pub struct ServiceResult {
    pub service: String,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ServiceStatus {
    Handled(Outcome),
    Failed { outcome: &'static str, error: String },
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub project: String,
    pub record: String,
    pub results: Vec<ServiceResult>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", post(dispatch_all))
        .route("/{service}", post(dispatch_one))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn dispatch_all(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<DispatchResponse>, WebhookError> {
    let ctx = accept(&state, &query, &headers, form)?;
    if !state.registry().serves_project(&ctx.project) {
        return Err(refuse_project(&ctx));
    }

    let targets: Vec<&Arc<dyn Integration>> = state
        .registry()
        .interested(&ctx.project, &ctx.instrument)
        .collect();
    Ok(Json(run_all(&ctx, targets).await))
}

async fn dispatch_one(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<DispatchResponse>, WebhookError> {
    let ctx = accept(&state, &query, &headers, form)?;
    let integration = state
        .registry()
        .get(&service)
        .ok_or_else(|| WebhookError::UnknownService(service.clone()))?;
    if !integration.projects().contains(&ctx.project) {
        return Err(refuse_project(&ctx));
    }

    let targets: Vec<&Arc<dyn Integration>> =
        if integration.is_interested(&ctx.project, &ctx.instrument) {
            vec![integration]
        } else {
            Vec::new()
        };
    Ok(Json(run_all(&ctx, targets).await))
}

/// Authenticate, parse and attribute a notification.
fn accept(
    state: &AppState,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    form: HashMap<String, String>,
) -> Result<DispatchContext, WebhookError> {
    let claimed_project = form.get("project_id").map(String::as_str).map(str::trim);
    let expected = state.inner.config.secret_for(claimed_project);
    if let Err(e) = auth::verify_secret(expected, auth::presented_secret(headers, query)) {
        tracing::warn!(project = claimed_project.unwrap_or("-"), "notification rejected: {e}");
        return Err(e);
    }

    let ctx = DispatchContext::from_form(form).inspect_err(|e| {
        tracing::warn!("notification rejected: {e}");
    })?;

    if !ctx.is_from(&state.inner.redcap_url) {
        let origin = ctx.redcap_url.clone().unwrap_or_default();
        tracing::warn!(project = %ctx.project, origin = %origin, "notification from unexpected REDCap instance");
        return Err(WebhookError::ForeignInstance(origin));
    }
    Ok(ctx)
}

fn refuse_project(ctx: &DispatchContext) -> WebhookError {
    tracing::warn!(project = %ctx.project, record = %ctx.record, "notification for unconfigured project");
    WebhookError::ProjectNotConfigured(ctx.project.to_string())
}

async fn run_all(ctx: &DispatchContext, targets: Vec<&Arc<dyn Integration>>) -> DispatchResponse {
    if targets.is_empty() {
        tracing::debug!(project = %ctx.project, instrument = %ctx.instrument, "no interested integrations");
    }

    let mut results = Vec::with_capacity(targets.len());
    for integration in targets {
        let status = match integration.handle(ctx).await {
            Ok(outcome) => {
                if let Outcome::Deferred { reason } = &outcome {
                    tracing::warn!(
                        service = integration.name(),
                        project = %ctx.project,
                        record = %ctx.record,
                        "integration deferred: {reason}"
                    );
                }
                ServiceStatus::Handled(outcome)
            }
            Err(e) => {
                tracing::error!(
                    service = integration.name(),
                    project = %ctx.project,
                    record = %ctx.record,
                    "integration failed: {e}"
                );
                ServiceStatus::Failed {
                    outcome: "failed",
                    error: e.to_string(),
                }
            }
        };
        results.push(ServiceResult {
            service: integration.name().to_string(),
            status,
        });
    }

    DispatchResponse {
        project: ctx.project.to_string(),
        record: ctx.record.clone(),
        results,
    }
}

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
