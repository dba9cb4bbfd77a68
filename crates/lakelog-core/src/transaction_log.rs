//! Append-only transaction log and snapshot reconstruction.
//!
//! This module implements the log layer of `lakelog`: the action model
//! written to `_delta_log/`, the log store that owns version files,
//! digests and checkpoints, and the snapshot builder that replays them.
//!
//! - Version files are newline-delimited JSON, one action per line, named
//!   by a 20-digit zero-padded version number.
//! - Creating `<version>.json` with create-if-absent semantics is the
//!   linearization point for that version; exactly one writer wins it.
//! - Every version may carry a `<version>.crc` consistency digest, used to
//!   validate checkpoints before trusting them.
//! - Checkpoints flatten the cumulative state at a version into a single
//!   Parquet file so replay cost stays bounded by the number of versions
//!   since the last checkpoint.
//!
//! ## On-disk layout (high level)
//!
//! ```text
//! table_root/
//!   _delta_log/
//!     00000000000000000000.json              # version 0 (CREATE TABLE)
//!     00000000000000000000.crc               # digest of the snapshot at 0
//!     ...
//!     00000000000000000010.checkpoint.parquet
//!     _last_checkpoint                       # {"version":10,"size":42}
//!   part-00000-<uuid>.parquet                # data files
//! ```
//!
//! This module does not know about data file formats or query engines; it
//! only provides the persisted log and the machinery to read it back.
pub mod actions;
pub mod checkpoint;
pub mod digest;
pub mod log_store;
pub mod schema;
pub mod snapshot;
pub mod table_config;

pub use actions::{
    Action, ActionSummary, AddFile, CommitInfo, FileStats, Format, Metadata, Protocol, RemoveFile,
};
pub use digest::{FileSizeHistogram, VersionDigest};
pub use log_store::TransactionLogStore;
pub use schema::{FieldType, SchemaError, SchemaField, TableSchema};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use table_config::{TableConfig, TableConfigError};

use parquet::errors::ParquetError;
use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the transaction log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommitError {
    /// Another writer already created the version file.
    #[snafu(display("Version {version} already exists in the log"))]
    VersionAlreadyExists {
        /// The contested version.
        version: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A requested version is negative or beyond the latest version.
    #[snafu(display("Version {requested} not found (latest version: {latest:?})"))]
    VersionNotFound {
        /// The version the caller asked for.
        requested: i64,
        /// The latest version present in the log, if any.
        latest: Option<u64>,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The log directory holds no version files.
    #[snafu(display("No versions found in the transaction log"))]
    EmptyLog {
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Version files are not contiguous.
    ///
    /// This indicates external tampering and is never recovered
    /// automatically.
    #[snafu(display("Version gap in transaction log: expected {expected}, found {found}"))]
    VersionGap {
        /// The next version that should have been present.
        expected: u64,
        /// The version actually found after the gap.
        found: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The log is in an unexpected / malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A checkpoint disagrees with its consistency digest.
    #[snafu(display("Corrupt checkpoint at version {version}: {msg}"))]
    CorruptCheckpoint {
        /// Version of the rejected checkpoint.
        version: u64,
        /// What did not match.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log.
    ///
    /// Backtraces are delegated to the inner StorageError.
    #[snafu(display("Storage error while accessing transaction log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A log file could not be encoded or decoded as JSON.
    #[snafu(display("Invalid JSON in log file for version {version}: {source}"))]
    Codec {
        /// Version whose file failed to (de)serialize.
        version: u64,
        /// Underlying serde_json error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A checkpoint could not be encoded or decoded as Parquet.
    #[snafu(display("Invalid checkpoint for version {version}: {source}"))]
    Checkpoint {
        /// Version of the checkpoint.
        version: u64,
        /// Underlying Parquet or Arrow error.
        source: ParquetError,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The caller cancelled the operation.
    #[snafu(display("Operation cancelled"))]
    Cancelled {
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}
