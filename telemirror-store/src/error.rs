//! Error and outcome types for the local store.
//!
//! The store reports failures through two deliberately separate channels:
//!
//! - Create and update calls return [`WriteOutcome`]. A rejected insert or an
//!   update that matched no row is a [`WriteOutcome::Failed`] value, logged and
//!   returned, never raised. Callers must inspect it.
//! - Read calls return `Result<T, StoreError>` and raise
//!   [`StoreError::NotFound`] when no row matches.
//!
//! [`StoreError::Unavailable`] is the only error a write can raise: the store
//! could not be reached at all.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened, configured, or found.
    #[error("store unavailable at {path}: {reason}")]
    Unavailable {
        /// Path of the database file.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// A read matched no row.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Key used for the lookup.
        key: String,
    },
    /// The engine rejected a read query.
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    /// A persisted metadata blob could not be decoded.
    #[error("stored metadata is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Unavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, key: &str) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns true if this error means the lookup key did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result alias used throughout the store.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a create or update call.
#[must_use = "write failures are reported in the outcome, not raised"]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The write was applied. Carries the re-read aggregate for updates.
    Written(T),
    /// The write was rejected and nothing was committed.
    Failed {
        /// Human readable cause, already logged by the store.
        reason: String,
    },
}

impl<T> WriteOutcome<T> {
    pub(crate) fn failed(reason: impl ToString) -> Self {
        WriteOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    /// The boolean view of the outcome.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }

    /// The written value, discarding the failure reason.
    pub fn written(self) -> Option<T> {
        match self {
            WriteOutcome::Written(value) => Some(value),
            WriteOutcome::Failed { .. } => None,
        }
    }

    /// The failure reason, if the write was rejected.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            WriteOutcome::Written(_) => None,
            WriteOutcome::Failed { reason } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U> {
        match self {
            WriteOutcome::Written(value) => WriteOutcome::Written(f(value)),
            WriteOutcome::Failed { reason } => WriteOutcome::Failed { reason },
        }
    }
}
