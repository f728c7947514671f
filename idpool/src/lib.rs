//! Identifier pools for REDCap Booster
//!
//! Each project owns a pool of pre-generated identifiers stored in SQLite.
//! Integrations bind identifiers to REDCap records with
//! [`IdentifierStore::get_or_allocate`]; administrators load, import,
//! export and correct pools through the CLI.
//!
//! - [`store`]: allocation, bulk load/import, export
//! - [`remap`]: atomic two-phase correction batches
//! - [`records`]: in-place record-key updates
//! - [`audit`]: per-batch audit trail
//! - [`tabular`]: the CSV / line-list file formats

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod audit;
pub mod db;
pub mod errors;
mod locks;
pub mod project;
pub mod records;
pub mod remap;
pub mod store;
pub mod tabular;

pub use errors::{ErrorCategory, IdPoolError, PostconditionFailure, Result, Warning};
pub use project::ProjectId;
pub use records::{RecordChange, RecordUpdate, RecordUpdateReport};
pub use remap::{AppliedCorrection, CorrectionEntry, RemapOptions, RemapReport, RemappingEngine};
pub use store::{IdentifierRecord, IdentifierStore, LoadSummary, PoolStats};
