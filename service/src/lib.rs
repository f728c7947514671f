//! REDCap Booster webhook service
//!
//! Receives REDCap Data Entry Triggers, authenticates them, and routes each
//! to the integrations configured for its project.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod integration;
pub mod integrations;
pub mod notification;
pub mod redcap;
pub mod server;

pub use config::{BoosterConfig, ProjectSettings, ServiceKind, ServiceProjectConfig};
pub use errors::{IntegrationError, ServiceError, WebhookError};
pub use integration::{Integration, Outcome, Registry};
pub use notification::DispatchContext;
pub use redcap::RedcapClient;
pub use server::{AppState, router, serve};
