//! Error types for the query pipeline and action flows.
//!
//! Pivot and render errors are folded into a failed
//! [`QueryOutcome`](crate::query::QueryOutcome) so batch callers can carry on.
//! [`FileIOError`] and store unavailability are raised.

use std::path::PathBuf;
use telemirror_store::StoreError;
use thiserror::Error;

/// Boxed error returned by remote collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The series body handed over by the transport is malformed.
#[derive(Debug, Error)]
pub enum PivotInputError {
    #[error("series body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("series body must be an object keyed by axis name")]
    NotAnObject,
    #[error("readings for axis {axis:?} must be a list")]
    NotAList { axis: String },
    #[error("reading {index} of axis {axis:?} is malformed: {reason}")]
    MalformedReading {
        axis: String,
        index: usize,
        reason: String,
    },
}

impl PivotInputError {
    pub(crate) fn malformed(axis: &str, index: usize, reason: impl Into<String>) -> Self {
        PivotInputError::MalformedReading {
            axis: axis.to_string(),
            index,
            reason: reason.into(),
        }
    }
}

/// A pivoted table could not be turned into text.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("row {timestamp} has {found} cells, expected {expected}")]
    RaggedRow {
        timestamp: i64,
        expected: usize,
        found: usize,
    },
    #[error("formatting failed: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Writing an export file failed. Files written before the failure stay on
/// disk.
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct FileIOError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Why a sensor query did not produce a table.
#[derive(Debug, Error)]
pub enum QueryFailure {
    #[error("sensor {0:?} is not defined on this thing")]
    UnknownSensor(String),
    #[error("no {0} available")]
    MissingToken(&'static str),
    #[error("telemetry source failed: {0}")]
    Source(String),
    #[error(transparent)]
    Pivot(#[from] PivotInputError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Why an account or thing action did not fully succeed.
#[derive(Debug, Error)]
pub enum ActionFailure {
    #[error("remote service rejected the request: {0}")]
    Remote(String),
    #[error("no {0} available")]
    MissingCredential(&'static str),
    #[error("remote call succeeded but local persistence failed: {0}")]
    NotPersisted(String),
    #[error("no sensor readings to send; remote service not called")]
    NoReadings,
}

/// Top-level error for the binary.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pivot(#[from] PivotInputError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    FileIO(#[from] FileIOError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
