//! Error types and SNAFU context selectors for the `table` module.
//!
//! This module centralizes the `TableError` enum used by the public API and
//! exposes context selectors (via `#[snafu(visibility(pub(crate)))]`) so the
//! operation modules can attach context without re-exporting everything at
//! the crate root.

use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    formats::DataFileError,
    storage::StorageError,
    transaction_log::{CommitError, SchemaError, TableConfigError},
};

/// Errors from high-level table operations.
///
/// User-visible failures of commits always name the operation and the
/// versions involved so callers can decide whether to restart the job.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Any other error coming from the transaction log (storage failures,
    /// corrupt version files, version gaps).
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying transaction log error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// Time travel to a version that does not exist.
    #[snafu(display("Version {requested} does not exist (latest version: {latest:?})"))]
    VersionNotFound {
        /// Requested version.
        requested: i64,
        /// Latest committed version, if any.
        latest: Option<u64>,
    },

    /// Time travel to a timestamp before the first available commit.
    #[snafu(display(
        "No version committed at or before {timestamp} (earliest available commit: {earliest})"
    ))]
    TimestampNotFound {
        /// Requested timestamp.
        timestamp: DateTime<Utc>,
        /// Commit time of the earliest available version.
        earliest: DateTime<Utc>,
    },

    /// A concurrent commit touched the same files (or changed the table
    /// metadata) after this operation read its snapshot. Also raised when
    /// the retry budget runs out or log retention pruned the base version.
    #[snafu(display(
        "{operation} based on version {base_version} conflicts with version \
         {conflicting_version}: {reason}"
    ))]
    ConcurrentModification {
        /// Operation that lost the race.
        operation: String,
        /// Version the operation read.
        base_version: u64,
        /// Winning version that caused the conflict.
        conflicting_version: u64,
        /// What overlapped.
        reason: String,
    },

    /// Vacuum guardrail: the retention window is below the table minimum.
    #[snafu(display(
        "Vacuum retention of {requested_hours} hours is below the minimum of \
         {minimum_hours} hours; pass force or disable the retention duration check to override"
    ))]
    RetentionTooLow {
        /// Retention the caller asked for.
        requested_hours: f64,
        /// Minimum derived from `delta.deletedFileRetentionDuration`.
        minimum_hours: f64,
    },

    /// Attempt to create a table where commits already exist.
    #[snafu(display("Table already exists at {location}; current version is {current_version}"))]
    AlreadyExists {
        /// Table root.
        location: String,
        /// Latest existing version.
        current_version: u64,
    },

    /// Attempt to open a location with no transaction log.
    #[snafu(display("No table found at {location} (transaction log is empty)"))]
    EmptyTable {
        /// Table root.
        location: String,
    },

    /// A table property value failed validation.
    #[snafu(display("Invalid table property: {source}"))]
    InvalidProperty {
        /// Underlying validation error.
        source: TableConfigError,
    },

    /// The table schema could not be built or parsed.
    #[snafu(display("Schema error: {source}"))]
    Schema {
        /// Underlying schema error.
        source: SchemaError,
    },

    /// Written data does not match the table schema or partitioning.
    #[snafu(display("Schema mismatch: {msg}"))]
    SchemaMismatch {
        /// What did not match.
        msg: String,
    },

    /// Several source rows of a MERGE share one join key.
    #[snafu(display("MERGE source has more than one row with {column} = {key}"))]
    DuplicateMergeKey {
        /// Join column.
        column: String,
        /// Duplicated key value.
        key: String,
    },

    /// Restoring would re-add files that no longer exist on disk.
    #[snafu(display(
        "Cannot restore to version {version}: {} referenced files were vacuumed (first: {})",
        paths.len(),
        paths.first().map(String::as_str).unwrap_or("")
    ))]
    RestoreFilesMissing {
        /// Restore target.
        version: u64,
        /// Missing data files.
        paths: Vec<String>,
    },

    /// Data file codec failure.
    #[snafu(display("Data file error: {source}"))]
    DataFile {
        /// Underlying codec error.
        #[snafu(source, backtrace)]
        source: DataFileError,
    },

    /// Arrow compute error while evaluating predicates or rewriting rows.
    #[snafu(display("Arrow error while rewriting rows: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Storage error while accessing table data.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The caller cancelled the operation.
    #[snafu(display("Operation cancelled"))]
    Cancelled,
}

impl From<CommitError> for TableError {
    fn from(source: CommitError) -> Self {
        match source {
            CommitError::VersionNotFound {
                requested, latest, ..
            } => TableError::VersionNotFound { requested, latest },
            CommitError::Cancelled { .. } => TableError::Cancelled,
            source => TableError::TransactionLog { source },
        }
    }
}
