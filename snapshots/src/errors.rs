//! Error taxonomy for the snapshot engine
//!
//! Operations return `anyhow::Result`; failures that callers need to tell apart
//! are raised as a [`SnapshotError`] inside the `anyhow::Error` and can be
//! recovered with `err.downcast_ref::<SnapshotError>()`.

use std::fmt;

use crate::ledger::Table;

/// Main error type for the snapshot engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// A record that the operation requires does not exist
    NotFound { what: String },

    /// Unknown codec/table pairing or otherwise unusable settings
    Configuration { reason: String },

    /// I/O, compression or (de)serialization failure inside a stream stage
    Pipeline { table: Option<Table>, reason: String },

    /// A record was rejected by its table's verify predicate
    VerificationFailure {
        table: Table,
        /// 1-based position of the rejected record in the table file
        index: u64,
        reason: String,
    },

    /// The requested operation would break referential ordering between tables
    IntegrityViolation { reason: String },
}

impl SnapshotError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SnapshotError::NotFound { what: what.into() }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        SnapshotError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn pipeline(table: Table, reason: impl Into<String>) -> Self {
        SnapshotError::Pipeline {
            table: Some(table),
            reason: reason.into(),
        }
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        SnapshotError::IntegrityViolation {
            reason: reason.into(),
        }
    }

    /// Look for a `SnapshotError` anywhere in an `anyhow` chain
    pub fn find(err: &anyhow::Error) -> Option<&SnapshotError> {
        err.chain().find_map(|cause| cause.downcast_ref::<SnapshotError>())
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::NotFound { what } => write!(f, "Not found: {}", what),
            SnapshotError::Configuration { reason } => {
                write!(f, "Configuration error: {}", reason)
            }
            SnapshotError::Pipeline {
                table: Some(table),
                reason,
            } => write!(f, "Pipeline error in table '{}': {}", table, reason),
            SnapshotError::Pipeline { table: None, reason } => {
                write!(f, "Pipeline error: {}", reason)
            }
            SnapshotError::VerificationFailure {
                table,
                index,
                reason,
            } => write!(
                f,
                "Verification failed for record {} in table '{}': {}",
                index, table, reason
            ),
            SnapshotError::IntegrityViolation { reason } => {
                write!(f, "Integrity violation: {}", reason)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}
