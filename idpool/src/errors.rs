//! Identifier pool error types
//!
//! Fatal errors abort an operation before (or roll back) any durable
//! mutation. Non-fatal conditions are [`Warning`]s carried in operation
//! reports; pool exhaustion is `Ok(None)` and never an error.

use std::fmt;

use thiserror::Error;

/// Error category for structured logging and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input or a batch that would break a uniqueness invariant
    ValidationError,
    /// The table is not in the state the operation requires
    StateError,
    /// A remapping post-condition did not hold; the batch was rolled back
    ConsistencyError,
    /// SQLite or connection pool failures
    StorageError,
    /// Reading or writing tabular files
    IoError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::StateError => "STATE_ERROR",
            Self::ConsistencyError => "CONSISTENCY_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::IoError => "IO_ERROR",
        }
    }

    /// Whether the failure was caused by the caller's input rather than the
    /// environment. Input failures never leave a partial mutation behind.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError | Self::StateError | Self::ConsistencyError
        )
    }
}

/// One correction whose post-condition check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostconditionFailure {
    pub current_id: String,
    pub corrected_id: String,
    pub expected_record: Option<String>,
    pub found_record: Option<String>,
}

impl fmt::Display for PostconditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' -> '{}': expected record {}, found {}",
            self.current_id,
            self.corrected_id,
            display_record(self.expected_record.as_deref()),
            display_record(self.found_record.as_deref()),
        )
    }
}

fn display_record(record: Option<&str>) -> String {
    match record {
        Some(r) => format!("'{r}'"),
        None => "<unbound>".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum IdPoolError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("state error: {message}")]
    State { message: String },

    #[error("consistency error: {} correction(s) failed post-condition check", failures.len())]
    Consistency { failures: Vec<PostconditionFailure> },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl IdPoolError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::ValidationError,
            Self::State { .. } => ErrorCategory::StateError,
            Self::Consistency { .. } => ErrorCategory::ConsistencyError,
            Self::Storage { .. } => ErrorCategory::StorageError,
            Self::Io { .. } => ErrorCategory::IoError,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error with source
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for IdPoolError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage_with_source("sqlite operation failed", e)
    }
}

impl From<r2d2::Error> for IdPoolError {
    fn from(e: r2d2::Error) -> Self {
        Self::storage_with_source("failed to get pooled connection", e)
    }
}

/// Result type for identifier pool operations
pub type Result<T> = std::result::Result<T, IdPoolError>;

/// A non-fatal condition reported alongside a successful batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A correction or update referenced an identifier absent from the table.
    IdentifierNotFound {
        identifier: String,
        /// Which column of the input named it (`current_id`, `corrected_id`, `id`)
        role: &'static str,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentifierNotFound { identifier, role } => {
                write!(f, "{role} '{identifier}' not found")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_codes() {
        assert_eq!(
            IdPoolError::validation("x").category().as_str(),
            "VALIDATION_ERROR"
        );
        assert_eq!(IdPoolError::state("x").category(), ErrorCategory::StateError);
        assert!(ErrorCategory::ConsistencyError.is_input_error());
        assert!(!ErrorCategory::StorageError.is_input_error());
    }

    #[test]
    fn consistency_error_lists_failures() {
        let err = IdPoolError::Consistency {
            failures: vec![PostconditionFailure {
                current_id: "A".to_string(),
                corrected_id: "B".to_string(),
                expected_record: Some("r1".to_string()),
                found_record: None,
            }],
        };
        assert_eq!(
            err.to_string(),
            "consistency error: 1 correction(s) failed post-condition check"
        );
        if let IdPoolError::Consistency { failures } = err {
            assert_eq!(
                failures[0].to_string(),
                "'A' -> 'B': expected record 'r1', found <unbound>"
            );
        }
    }
}
