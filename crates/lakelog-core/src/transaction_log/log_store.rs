//! Async helpers for persisting and reading the transaction log.
//!
//! This module owns all on-disk interactions with `_delta_log/`:
//! - Creating version files with create-if-absent semantics so each version
//!   is written exactly once.
//! - Listing versions and enforcing that they form a contiguous range.
//! - Reading and writing per-version digests, checkpoints and the
//!   `_last_checkpoint` hint.
//! - Mapping storage-layer failures into [`CommitError`] variants so callers
//!   can differentiate between lost races, storage errors, and corrupt state.
//!
//! Idempotent reads go through the store's [`RetryPolicy`]; appends are
//! never retried because a failed append has an ambiguous outcome.
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::storage::{
    self, ObjectMeta, RetryPolicy, StorageError, TableLocation,
    layout::{self, LogFileKind},
};
use crate::transaction_log::{
    actions::{decode_actions, encode_actions},
    checkpoint::{decode_checkpoint, encode_checkpoint},
    *,
};

/// Contents of `_delta_log/_last_checkpoint`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastCheckpoint {
    /// Version of the newest checkpoint.
    pub version: u64,
    /// Number of actions stored in it.
    pub size: u64,
}

/// Helper for reading and writing the transaction log under a table root.
///
/// Layout:
///   <root>/_delta_log/00000000000000000000.json
///   <root>/_delta_log/00000000000000000000.crc
///   <root>/_delta_log/00000000000000000010.checkpoint.parquet
///   <root>/_delta_log/_last_checkpoint
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
    read_retry: RetryPolicy,
}

impl TransactionLogStore {
    /// Create a new TransactionLogStore rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self {
            location,
            read_retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for reads.
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Get the TableLocation of the LogStore.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    async fn read_string_rel(&self, rel: &Path) -> Result<String, StorageError> {
        let what = rel.display().to_string();
        self.read_retry
            .run(&what, || storage::read_to_string(self.location.as_ref(), rel))
            .await
    }

    async fn read_bytes_rel(&self, rel: &Path) -> Result<Vec<u8>, StorageError> {
        let what = rel.display().to_string();
        self.read_retry
            .run(&what, || storage::read_all_bytes(self.location.as_ref(), rel))
            .await
    }

    /// Append `actions` as version `version`.
    ///
    /// Fails with [`CommitError::VersionAlreadyExists`] when another writer
    /// created the file first, and with [`CommitError::VersionGap`] when
    /// `version - 1` is not present. A missing `version - 1` that log
    /// retention pruned behind a newer head counts as a lost race.
    pub async fn append(&self, version: u64, actions: &[Action]) -> Result<(), CommitError> {
        if version > 0 {
            let prev = layout::version_rel_path(version - 1);
            match storage::head(self.location.as_ref(), &prev).await {
                Ok(_) => {}
                Err(StorageError::NotFound { .. }) => {
                    if self.latest_version().await?.is_some_and(|l| l >= version) {
                        return VersionAlreadyExistsSnafu { version }.fail();
                    }
                    return VersionGapSnafu {
                        expected: version - 1,
                        found: version,
                    }
                    .fail();
                }
                Err(source) => return Err(CommitError::Storage { source }),
            }
        }

        let bytes = encode_actions(actions).context(CodecSnafu { version })?;
        let rel = layout::version_rel_path(version);
        match storage::write_new(self.location.as_ref(), &rel, &bytes).await {
            Ok(()) => {
                debug!("wrote {} ({} actions)", rel.display(), actions.len());
                Ok(())
            }
            Err(StorageError::AlreadyExists { .. }) => VersionAlreadyExistsSnafu { version }.fail(),
            Err(source) => Err(CommitError::Storage { source }),
        }
    }

    /// Read the actions of one version.
    pub async fn read(&self, version: u64) -> Result<Vec<Action>, CommitError> {
        let rel = layout::version_rel_path(version);
        let text = self.read_string_rel(&rel).await.context(StorageSnafu)?;
        decode_actions(&text).context(CodecSnafu { version })
    }

    /// Whether version file `version` exists.
    pub async fn version_exists(&self, version: u64) -> Result<bool, CommitError> {
        match storage::head(self.location.as_ref(), &layout::version_rel_path(version)).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(source) => Err(CommitError::Storage { source }),
        }
    }

    /// List every recognized file in the log directory, with its metadata.
    pub async fn list_log_files(&self) -> Result<Vec<(LogFileKind, ObjectMeta)>, CommitError> {
        let dir = layout::log_rel_dir();
        let entries = self
            .read_retry
            .run("list log", || storage::list_dir(self.location.as_ref(), &dir))
            .await
            .context(StorageSnafu)?;

        Ok(entries
            .into_iter()
            .filter_map(|meta| {
                let name = meta.rel_path.to_str()?;
                let kind = layout::parse_log_file_name(name)?;
                Some((kind, meta))
            })
            .collect())
    }

    /// Sorted version numbers present in the log.
    ///
    /// Versions older than the retention window may have been pruned, so the
    /// range need not start at 0, but it must be contiguous.
    pub async fn list_versions(&self) -> Result<Vec<u64>, CommitError> {
        let mut versions: Vec<u64> = self
            .list_log_files()
            .await?
            .into_iter()
            .filter_map(|(kind, _)| match kind {
                LogFileKind::Version(v) => Some(v),
                _ => None,
            })
            .collect();
        versions.sort_unstable();
        check_contiguous(&versions)?;
        Ok(versions)
    }

    /// Latest version present in the log, or `None` for an empty log.
    pub async fn latest_version(&self) -> Result<Option<u64>, CommitError> {
        Ok(self.list_versions().await?.last().copied())
    }

    /// Sorted versions that have a checkpoint.
    pub async fn list_checkpoints(&self) -> Result<Vec<u64>, CommitError> {
        let mut versions: Vec<u64> = self
            .list_log_files()
            .await?
            .into_iter()
            .filter_map(|(kind, _)| match kind {
                LogFileKind::Checkpoint(v) => Some(v),
                _ => None,
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Write a checkpoint for `version` and point `_last_checkpoint` at it.
    ///
    /// Checkpoints are derived data, so an existing checkpoint for the same
    /// version is replaced.
    pub async fn write_checkpoint(
        &self,
        version: u64,
        actions: &[Action],
    ) -> Result<(), CommitError> {
        let bytes = encode_checkpoint(actions).context(CheckpointSnafu { version })?;
        storage::write_atomic(
            self.location.as_ref(),
            &layout::checkpoint_rel_path(version),
            &bytes,
        )
        .await
        .context(StorageSnafu)?;

        let hint = LastCheckpoint {
            version,
            size: actions.len() as u64,
        };
        let hint_bytes = serde_json::to_vec(&hint).context(CodecSnafu { version })?;
        storage::write_atomic(
            self.location.as_ref(),
            &layout::last_checkpoint_rel_path(),
            &hint_bytes,
        )
        .await
        .context(StorageSnafu)?;
        Ok(())
    }

    /// Read the flattened actions stored in the checkpoint for `version`.
    pub async fn read_checkpoint(&self, version: u64) -> Result<Vec<Action>, CommitError> {
        let bytes = self
            .read_bytes_rel(&layout::checkpoint_rel_path(version))
            .await
            .context(StorageSnafu)?;
        decode_checkpoint(Bytes::from(bytes)).context(CheckpointSnafu { version })
    }

    /// Read the latest checkpoint at or before `version`, without validation.
    pub async fn read_latest_checkpoint_at_or_before(
        &self,
        version: u64,
    ) -> Result<Option<(u64, Vec<Action>)>, CommitError> {
        let candidate = self
            .list_checkpoints()
            .await?
            .into_iter()
            .rev()
            .find(|&v| v <= version);
        match candidate {
            Some(v) => Ok(Some((v, self.read_checkpoint(v).await?))),
            None => Ok(None),
        }
    }

    /// Read the `_last_checkpoint` hint. A missing hint yields `None`.
    pub async fn read_last_checkpoint(&self) -> Result<Option<LastCheckpoint>, CommitError> {
        let rel = layout::last_checkpoint_rel_path();
        let text = match self.read_string_rel(&rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(CommitError::Storage { source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| {
                CorruptStateSnafu {
                    msg: format!("invalid _last_checkpoint {text:?}: {e}"),
                }
                .build()
            })
    }

    /// Store the consistency digest for `version`.
    pub async fn write_digest(
        &self,
        version: u64,
        digest: &VersionDigest,
    ) -> Result<(), CommitError> {
        let bytes = serde_json::to_vec(digest).context(CodecSnafu { version })?;
        storage::write_atomic(
            self.location.as_ref(),
            &layout::digest_rel_path(version),
            &bytes,
        )
        .await
        .context(StorageSnafu)
    }

    /// Read the consistency digest for `version`, if one was written.
    pub async fn read_digest(&self, version: u64) -> Result<Option<VersionDigest>, CommitError> {
        let text = match self.read_string_rel(&layout::digest_rel_path(version)).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(CommitError::Storage { source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .context(CodecSnafu { version })
    }

    /// Commit time of `version` in milliseconds since the Unix epoch.
    ///
    /// Uses the `CommitInfo` timestamp, falling back to the version file's
    /// modification time when the version carries no commit info.
    pub async fn commit_timestamp(&self, version: u64) -> Result<i64, CommitError> {
        let actions = self.read(version).await?;
        if let Some(ts) = actions.iter().find_map(|a| match a {
            Action::CommitInfo(ci) => Some(ci.timestamp),
            _ => None,
        }) {
            return Ok(ts);
        }
        let meta = storage::head(self.location.as_ref(), &layout::version_rel_path(version))
            .await
            .context(StorageSnafu)?;
        Ok(meta.last_modified.timestamp_millis())
    }

    /// Modification time of each version file, keyed by version.
    pub async fn version_mtimes(&self) -> Result<Vec<(u64, DateTime<Utc>)>, CommitError> {
        let mut out: Vec<(u64, DateTime<Utc>)> = self
            .list_log_files()
            .await?
            .into_iter()
            .filter_map(|(kind, meta)| match kind {
                LogFileKind::Version(v) => Some((v, meta.last_modified)),
                _ => None,
            })
            .collect();
        out.sort_unstable_by_key(|(v, _)| *v);
        Ok(out)
    }

    /// Delete a version file together with its digest.
    ///
    /// Returns whether the version file was present.
    pub async fn delete_version(&self, version: u64) -> Result<bool, CommitError> {
        let removed = storage::delete(self.location.as_ref(), &layout::version_rel_path(version))
            .await
            .context(StorageSnafu)?;
        storage::delete(self.location.as_ref(), &layout::digest_rel_path(version))
            .await
            .context(StorageSnafu)?;
        Ok(removed)
    }

    /// Delete the checkpoint for `version`. Returns whether it was present.
    pub async fn delete_checkpoint(&self, version: u64) -> Result<bool, CommitError> {
        storage::delete(self.location.as_ref(), &layout::checkpoint_rel_path(version))
            .await
            .context(StorageSnafu)
    }
}

fn check_contiguous(sorted: &[u64]) -> Result<(), CommitError> {
    for pair in sorted.windows(2) {
        if pair[1] != pair[0] + 1 {
            return VersionGapSnafu {
                expected: pair[0] + 1,
                found: pair[1],
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{add_file, sample_metadata};
    use crate::transaction_log::Protocol;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn store(tmp: &TempDir) -> TransactionLogStore {
        TransactionLogStore::new(TableLocation::local(tmp.path()))
            .with_read_retry(RetryPolicy::no_retry())
    }

    fn initial_actions() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(sample_metadata()),
        ]
    }

    #[tokio::test]
    async fn append_then_read_round_trips() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);

        store.append(0, &initial_actions()).await?;
        store
            .append(1, &[Action::Add(add_file("part-1.parquet", 10))])
            .await?;

        assert_eq!(store.read(0).await?, initial_actions());
        assert_eq!(store.list_versions().await?, vec![0, 1]);
        assert_eq!(store.latest_version().await?, Some(1));
        assert!(
            tmp.path()
                .join("_delta_log/00000000000000000001.json")
                .is_file()
        );
        Ok(())
    }

    #[tokio::test]
    async fn second_append_of_same_version_loses() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);

        store.append(0, &initial_actions()).await?;
        let err = store.append(0, &initial_actions()).await.unwrap_err();
        assert!(matches!(err, CommitError::VersionAlreadyExists { version: 0, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn append_refuses_to_leave_a_gap() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);

        store.append(0, &initial_actions()).await?;
        let err = store.append(2, &[]).await.unwrap_err();
        assert!(matches!(err, CommitError::VersionGap { expected: 1, found: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn append_behind_a_pruned_prefix_is_a_lost_race() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);
        for v in 0..4 {
            store.append(v, &[]).await?;
        }
        store.delete_version(0).await?;
        store.delete_version(1).await?;

        let err = store.append(2, &[]).await.unwrap_err();
        assert!(matches!(err, CommitError::VersionAlreadyExists { version: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_versions_reports_gaps_left_by_tampering() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);
        for v in 0..3 {
            store.append(v, &[]).await?;
        }
        std::fs::remove_file(tmp.path().join("_delta_log/00000000000000000001.json"))?;

        let err = store.list_versions().await.unwrap_err();
        assert!(matches!(err, CommitError::VersionGap { expected: 1, found: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn empty_log_has_no_latest_version() -> TestResult {
        let tmp = TempDir::new()?;
        assert_eq!(store(&tmp).latest_version().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn checkpoint_and_hint_are_written_together() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);
        let flattened = initial_actions();

        store.write_checkpoint(4, &flattened).await?;
        store.write_checkpoint(8, &flattened).await?;

        assert_eq!(store.list_checkpoints().await?, vec![4, 8]);
        assert_eq!(
            store.read_last_checkpoint().await?,
            Some(LastCheckpoint {
                version: 8,
                size: 2
            })
        );

        let (v, actions) = store
            .read_latest_checkpoint_at_or_before(7)
            .await?
            .expect("checkpoint at 4");
        assert_eq!(v, 4);
        assert_eq!(actions, flattened);
        assert!(store.read_latest_checkpoint_at_or_before(3).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn digest_round_trips_and_missing_digest_is_none() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);
        let add = add_file("a.parquet", 5);
        let digest = VersionDigest::compute([&add], 1, 1);

        store.write_digest(0, &digest).await?;
        assert_eq!(store.read_digest(0).await?, Some(digest));
        assert_eq!(store.read_digest(1).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn commit_timestamp_prefers_commit_info() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store(&tmp);
        store
            .append(
                0,
                &[Action::CommitInfo(crate::test_util::commit_info("CREATE TABLE", 1_234))],
            )
            .await?;
        store.append(1, &[]).await?;

        assert_eq!(store.commit_timestamp(0).await?, 1_234);
        assert!(store.commit_timestamp(1).await? > 1_234);
        Ok(())
    }
}
