//! Error types for pipeline operations
//!
//! Two families:
//! - [`ItemFailure`]: one column or one pair failed. These are isolated,
//!   written to the run log, and never propagate.
//! - [`PipelineError`]: a whole stage or run failed. Returned to the caller
//!   inside a [`StageFailure`] together with the log trail up to that point.

use std::path::PathBuf;

use thiserror::Error;

use crate::log::RunLog;
use crate::source::SourceError;

/// Isolated failure of a single work item
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemFailure {
    /// Cardinality aggregate failed; the column is recorded as undefined
    #[error("column profile failed: {message}")]
    ColumnProfileFailed { column: String, message: String },

    /// Similarity estimate failed; the pair is omitted
    #[error("pair estimate failed: {message}")]
    PairEstimateFailed {
        left: String,
        right: String,
        message: String,
    },
}

impl ItemFailure {
    /// Identifying key for the log
    pub fn key(&self) -> String {
        match self {
            Self::ColumnProfileFailed { column, .. } => column.clone(),
            Self::PairEstimateFailed { left, right, .. } => format!("{left} ~ {right}"),
        }
    }
}

/// Errors that end a stage or a run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Data source cannot be reached; no partial catalog is produced
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Persisting the relation map failed
    #[error("Failed to write relation map '{table}': {message}")]
    GraphWriteFailed { table: String, message: String },

    /// Persisting another snapshot table failed
    #[error("Failed to write snapshot '{table}': {message}")]
    SnapshotWriteFailed { table: String, message: String },

    /// A stage needs a snapshot that was never written
    #[error("Snapshot '{0}' not found")]
    SnapshotMissing(String),

    /// A persisted snapshot could not be decoded
    #[error("Snapshot '{table}' is unreadable at row {row}: {message}")]
    SnapshotCorrupt {
        table: String,
        row: usize,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Run cancelled
    #[error("Pipeline cancelled")]
    Cancelled,

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Classify an adapter error raised while reading metadata or snapshots
    pub fn from_source(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => Self::SourceUnavailable(msg),
            other => Self::SourceUnavailable(other.to_string()),
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::SourceUnavailable(msg) => format!(
                "Cannot reach the data source: {msg}\n\n\
                Hint: Check the [source] section of obscura.toml."
            ),
            PipelineError::SnapshotMissing(table) => format!(
                "Snapshot table '{table}' does not exist.\n\n\
                Hint: Run 'obscura run' without --from to rebuild every stage."
            ),
            PipelineError::SnapshotCorrupt { table, .. } => format!(
                "{self}\n\nHint: Rerun the stage that writes '{table}' to replace it."
            ),
            PipelineError::GraphWriteFailed { .. } => format!(
                "{self}\n\nHint: Earlier snapshots are intact; rerun with --from relations."
            ),
            PipelineError::Config(msg) => {
                format!("Invalid configuration: {msg}\n\nHint: Check your obscura.toml.")
            }
            _ => self.to_string(),
        }
    }
}

/// A failed stage together with the log trail leading up to it
#[derive(Error, Debug)]
#[error("{error}")]
pub struct StageFailure {
    pub error: PipelineError,
    pub log: RunLog,
}

impl StageFailure {
    pub fn new(error: PipelineError, log: RunLog) -> Self {
        Self { error, log }
    }
}

/// Result of a public stage operation
pub type StageResult<T> = Result<crate::log::StageOutcome<T>, StageFailure>;
