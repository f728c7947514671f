//! Shared-secret authentication for incoming notifications
//!
//! REDCap cannot sign Data Entry Trigger requests, so the trigger URL
//! carries a shared secret, either as `?secret=` or in the
//! `X-Booster-Secret` header (for a reverse proxy that injects it).

use std::collections::HashMap;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::errors::WebhookError;

pub const SECRET_HEADER: &str = "x-booster-secret";
pub const SECRET_QUERY_PARAM: &str = "secret";

/// Secret presented by the caller; the header wins over the query string.
pub fn presented_secret<'a>(
    headers: &'a HeaderMap,
    query: &'a HashMap<String, String>,
) -> Option<&'a str> {
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| query.get(SECRET_QUERY_PARAM).map(String::as_str))
        .filter(|s| !s.is_empty())
}

/// Constant-time comparison of the presented secret against the expected
/// one. With no expected secret configured every request is refused.
pub fn verify_secret(expected: Option<&str>, presented: Option<&str>) -> Result<(), WebhookError> {
    let presented = presented.ok_or(WebhookError::MissingSecret)?;
    let Some(expected) = expected else {
        tracing::warn!("notification refused: no shared secret configured");
        return Err(WebhookError::InvalidSecret);
    };

    if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSecret)
    }
}
