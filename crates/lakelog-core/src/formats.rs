//! Data-file codecs.
//!
//! The log treats data files as opaque: a codec turns record batches into a
//! write-once file under the table root and reads them back. The table
//! layer only needs the resulting path, row count and size to build an
//! [`AddFile`].
pub mod parquet;

pub use self::parquet::ParquetDataFiles;

use std::{collections::BTreeMap, fmt::Debug};

use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};
use async_trait::async_trait;
use ::parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::storage::{StorageError, TableLocation};
use crate::transaction_log::{AddFile, FileStats};

/// Errors raised while writing or reading data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataFileError {
    /// Storage failure while accessing a data file.
    #[snafu(display("Storage error for data file {path}: {source}"))]
    Storage {
        /// Table-relative path of the file.
        path: String,
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The file could not be encoded.
    #[snafu(display("Failed to write data file {path}: {source}"))]
    Encode {
        /// Table-relative path of the file.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// The file could not be decoded.
    #[snafu(display("Failed to read data file {path}: {source}"))]
    Decode {
        /// Table-relative path of the file.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// A record batch operation failed.
    #[snafu(display("Arrow error while processing {path}: {source}"))]
    Arrow {
        /// Table-relative path of the file (or the table root).
        path: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// A file produced by [`DataFileCodec::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Path relative to the table root.
    pub path: String,
    /// Rows written.
    pub num_records: u64,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub modification_time: i64,
}

impl WrittenFile {
    /// The add action that introduces this file.
    pub fn into_add(
        self,
        partition_values: BTreeMap<String, Option<String>>,
        data_change: bool,
    ) -> AddFile {
        AddFile {
            path: self.path,
            partition_values,
            size_bytes: self.size_bytes,
            modification_time: self.modification_time,
            data_change,
            stats: Some(
                FileStats {
                    num_records: self.num_records,
                }
                .to_json(),
            ),
        }
    }
}

/// Writes and reads immutable data files under a table root.
#[async_trait]
pub trait DataFileCodec: Send + Sync + Debug {
    /// Provider name recorded in `Metadata.format`.
    fn provider(&self) -> &str;

    /// Write `batches` as one new file in `rel_dir` (empty for the root).
    async fn write(
        &self,
        location: &TableLocation,
        rel_dir: &str,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<WrittenFile, DataFileError>;

    /// Read every row of the file at `path`.
    async fn read(
        &self,
        location: &TableLocation,
        path: &str,
    ) -> Result<Vec<RecordBatch>, DataFileError>;
}
