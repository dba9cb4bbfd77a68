//! High-level table handle.
//!
//! [`LakeTable`] ties a table root to its [`TransactionLogStore`], the
//! per-handle [`EngineConfig`] and a [`DataFileCodec`]. Every mutation is
//! planned against a pinned [`Snapshot`] and committed through the
//! optimistic protocol in [`transaction`]; reads pin a snapshot at call time
//! and never block writers.
//!
//! Operations live in submodules, one per command:
//! - `create`: CREATE TABLE (version 0).
//! - `write`: INSERT / DELETE / UPDATE / MERGE.
//! - `history`: DESCRIBE HISTORY.
//! - `restore`: RESTORE to a version or timestamp.
//! - `optimize`: bin-packing compaction.
//! - `vacuum`: physical deletion of expired files.
//! - `checkpoint`: checkpoints and log retention.
//! - `properties`: ALTER TABLE SET / UNSET TBLPROPERTIES.
//! - `detail`: DESCRIBE DETAIL.
//!
//! `partition` holds the Hive-style layout helpers shared by the writers.
pub mod checkpoint;
pub mod create;
pub mod detail;
pub mod error;
pub mod history;
pub mod optimize;
pub mod partition;
pub mod properties;
pub mod restore;
pub mod transaction;
pub mod vacuum;
pub mod write;

pub use create::CreateOptions;
pub use detail::TableDetail;
pub use error::TableError;
pub use history::CommitRecord;
pub use optimize::{OptimizeMetrics, OptimizeOptions};
pub use transaction::{CommitOptions, CommitResult, Operation};
pub use vacuum::{VacuumMetrics, VacuumOptions};
pub use write::{MatchedAction, MergeOptions, MergeResult, Predicate, RowUpdate};

use std::{pin::Pin, sync::Arc};

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use snafu::prelude::*;

use crate::{
    cancel::CancelSignal,
    config::EngineConfig,
    formats::{DataFileCodec, ParquetDataFiles},
    storage::TableLocation,
    transaction_log::{CommitError, Snapshot, SnapshotBuilder, TransactionLogStore},
};
use error::{DataFileSnafu, EmptyTableSnafu, TimestampNotFoundSnafu};

/// Stream of record batches produced by [`LakeTable::scan_stream`].
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch, TableError>> + Send>>;

/// Handle to one table.
///
/// Cloning is cheap; clones share the codec but each clone may be used from
/// a different task. All table state lives in the log, so handles never
/// cache versions between calls.
#[derive(Debug, Clone)]
pub struct LakeTable {
    location: TableLocation,
    store: TransactionLogStore,
    config: EngineConfig,
    codec: Arc<dyn DataFileCodec>,
}

impl LakeTable {
    /// Handle for `location` with default configuration and the Parquet
    /// codec. The location is not checked; see [`LakeTable::open`].
    pub fn new(location: TableLocation) -> Self {
        let config = EngineConfig::default();
        let store = TransactionLogStore::new(location.clone()).with_read_retry(config.read_retry);
        Self {
            location,
            store,
            config,
            codec: Arc::new(ParquetDataFiles::new()),
        }
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.store =
            TransactionLogStore::new(self.location.clone()).with_read_retry(config.read_retry);
        self.config = config;
        self
    }

    /// Replace the data-file codec.
    pub fn with_codec(mut self, codec: Arc<dyn DataFileCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Open an existing table, failing with [`TableError::EmptyTable`] when
    /// `location` holds no transaction log.
    pub async fn open(location: TableLocation) -> Result<Self, TableError> {
        Self::new(location).ensure_exists().await
    }

    /// Validate that the log has at least one version.
    pub async fn ensure_exists(self) -> Result<Self, TableError> {
        match self.store.latest_version().await? {
            Some(_) => Ok(self),
            None => EmptyTableSnafu {
                location: self.location.to_string(),
            }
            .fail(),
        }
    }

    /// Table root.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Engine configuration of this handle.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying log store.
    pub fn log_store(&self) -> &TransactionLogStore {
        &self.store
    }

    /// Data-file codec of this handle.
    pub fn codec(&self) -> &Arc<dyn DataFileCodec> {
        &self.codec
    }

    /// Latest committed version.
    pub async fn version(&self) -> Result<u64, TableError> {
        match self.store.latest_version().await? {
            Some(v) => Ok(v),
            None => EmptyTableSnafu {
                location: self.location.to_string(),
            }
            .fail(),
        }
    }

    /// Snapshot at the latest version.
    pub async fn snapshot(&self) -> Result<Snapshot, TableError> {
        self.reconstruct(None, &CancelSignal::default()).await
    }

    /// Snapshot at `version` (`versionAsOf`).
    pub async fn snapshot_at_version(&self, version: i64) -> Result<Snapshot, TableError> {
        self.reconstruct(Some(version), &CancelSignal::default())
            .await
    }

    /// Snapshot with cooperative cancellation between file-level steps.
    pub async fn snapshot_with_cancel(
        &self,
        version: Option<i64>,
        cancel: &CancelSignal,
    ) -> Result<Snapshot, TableError> {
        self.reconstruct(version, cancel).await
    }

    async fn reconstruct(
        &self,
        as_of: Option<i64>,
        cancel: &CancelSignal,
    ) -> Result<Snapshot, TableError> {
        SnapshotBuilder::new(&self.store)
            .with_cancel(cancel.clone())
            .reconstruct(as_of)
            .await
            .map_err(|e| self.map_log_error(e))
    }

    pub(crate) fn map_log_error(&self, e: CommitError) -> TableError {
        match e {
            CommitError::EmptyLog { .. } => TableError::EmptyTable {
                location: self.location.to_string(),
            },
            other => other.into(),
        }
    }

    /// Snapshot at the latest version committed at or before `timestamp`
    /// (`timestampAsOf`).
    ///
    /// Commit timestamps are strictly increasing, so the lookup is a binary
    /// search over the available versions.
    pub async fn snapshot_at_timestamp(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Snapshot, TableError> {
        let version = self.version_at_timestamp(timestamp).await?;
        self.snapshot_at_version(version as i64).await
    }

    pub(crate) async fn version_at_timestamp(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, TableError> {
        let versions = self.store.list_versions().await?;
        let Some(&earliest) = versions.first() else {
            return EmptyTableSnafu {
                location: self.location.to_string(),
            }
            .fail();
        };
        let ts = timestamp.timestamp_millis();

        let earliest_ts = self.store.commit_timestamp(earliest).await?;
        if earliest_ts > ts {
            return TimestampNotFoundSnafu {
                timestamp,
                earliest: DateTime::<Utc>::from_timestamp_millis(earliest_ts)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            }
            .fail();
        }

        // Invariant: versions[lo] is committed at or before `ts`.
        let (mut lo, mut hi) = (0usize, versions.len());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.store.commit_timestamp(versions[mid]).await? <= ts {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(versions[lo])
    }

    /// Stream the rows of the live files of `snapshot`, in path order.
    ///
    /// The file list is fixed when the call is made; files are opened
    /// lazily as the stream is polled.
    pub fn scan_stream(&self, snapshot: &Snapshot) -> BatchStream {
        let location = self.location.clone();
        let codec = Arc::clone(&self.codec);
        let paths: Vec<String> = snapshot.files.keys().cloned().collect();

        let stream = futures::stream::iter(paths)
            .then(move |path| {
                let location = location.clone();
                let codec = Arc::clone(&codec);
                async move {
                    let batches = codec.read(&location, &path).await.context(DataFileSnafu)?;
                    Ok::<_, TableError>(futures::stream::iter(
                        batches.into_iter().map(Ok::<_, TableError>),
                    ))
                }
            })
            .try_flatten();
        Box::pin(stream)
    }

    /// Read every row of the live files of `snapshot`, in path order.
    pub async fn scan(&self, snapshot: &Snapshot) -> Result<Vec<RecordBatch>, TableError> {
        self.scan_stream(snapshot).try_collect().await
    }
}
