//! SQLite layer for identifier pools
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite) with WAL mode and a busy timeout
//! - Transaction helpers with automatic rollback
//! - Forward-only schema migrations tracked by `PRAGMA user_version`

pub mod connection;
pub mod migrations;
pub mod transactions;

pub use connection::{DbPool, initialize_pool};
pub use transactions::{execute_in_transaction, execute_then_rollback};
