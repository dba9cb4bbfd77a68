//! Reconstructing table snapshots by replaying the log.
//!
//! A [`Snapshot`] is the live-file set at a version together with the active
//! metadata and protocol. It is computed on demand and never persisted
//! directly; checkpoints are only a cached starting point for the replay.
//!
//! [`SnapshotBuilder::reconstruct`] starts from the newest checkpoint at or
//! before the target version that agrees with its consistency digest, then
//! replays the remaining version files in order. A checkpoint that fails
//! validation is logged and skipped; the builder falls back to an older
//! checkpoint or to full replay from version 0.
use std::collections::BTreeMap;

use log::{debug, warn};
use snafu::prelude::*;

use crate::cancel::CancelSignal;
use crate::transaction_log::{table_config::TableConfig, *};

/// Live-file set and active metadata as of one version.
///
/// Invariant: `files` and `tombstones` are disjoint, and exactly one
/// metadata and one protocol are active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Version this snapshot reflects.
    pub version: u64,
    /// Commit time of `version`, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Live files keyed by path.
    pub files: BTreeMap<String, AddFile>,
    /// Removed files still tracked for vacuum, keyed by path.
    pub tombstones: BTreeMap<String, RemoveFile>,
    /// Active table metadata.
    pub metadata: Metadata,
    /// Active protocol.
    pub protocol: Protocol,
}

impl Snapshot {
    /// Paths of the live files, sorted.
    pub fn file_paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    /// Number of live files.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Sum of live file sizes.
    pub fn size_bytes(&self) -> u64 {
        self.files.values().map(|a| a.size_bytes).sum()
    }

    /// Typed table properties.
    pub fn table_config(&self) -> TableConfig {
        TableConfig::from_configuration(&self.metadata.configuration)
    }

    /// Parsed table schema.
    pub fn schema(&self) -> Result<TableSchema, SchemaError> {
        TableSchema::from_json(&self.metadata.schema_string)
    }

    /// Consistency digest of this snapshot.
    pub fn digest(&self) -> VersionDigest {
        VersionDigest::compute(self.files.values(), 1, 1)
    }

    /// Apply the actions of the next version in place.
    ///
    /// Used by writers to rebase onto versions committed by others without
    /// replaying from scratch.
    pub fn apply_version(&mut self, version: u64, actions: &[Action]) {
        let mut state = ReplayState {
            files: std::mem::take(&mut self.files),
            tombstones: std::mem::take(&mut self.tombstones),
            metadata: Some(self.metadata.clone()),
            protocol: Some(self.protocol),
            timestamp: None,
        };
        for action in actions {
            state.apply(action.clone());
        }
        self.files = state.files;
        self.tombstones = state.tombstones;
        if let Some(m) = state.metadata {
            self.metadata = m;
        }
        if let Some(p) = state.protocol {
            self.protocol = p;
        }
        if let Some(ts) = state.timestamp {
            self.timestamp = ts;
        }
        self.version = version;
    }

    /// Flattened actions for a checkpoint of this snapshot.
    ///
    /// Tombstones deleted before `tombstone_cutoff_ms` are dropped; newer ones
    /// are kept so vacuum can still find their files.
    pub fn checkpoint_actions(&self, tombstone_cutoff_ms: i64) -> Vec<Action> {
        let mut out = Vec::with_capacity(2 + self.files.len() + self.tombstones.len());
        out.push(Action::Protocol(self.protocol));
        out.push(Action::Metadata(self.metadata.clone()));
        out.extend(self.files.values().cloned().map(Action::Add));
        out.extend(
            self.tombstones
                .values()
                .filter(|r| r.deletion_timestamp >= tombstone_cutoff_ms)
                .cloned()
                .map(Action::Remove),
        );
        out
    }
}

/// Accumulator used while replaying.
#[derive(Debug, Default)]
struct ReplayState {
    files: BTreeMap<String, AddFile>,
    tombstones: BTreeMap<String, RemoveFile>,
    metadata: Option<Metadata>,
    protocol: Option<Protocol>,
    timestamp: Option<i64>,
}

impl ReplayState {
    fn apply(&mut self, action: Action) {
        match action {
            Action::Add(add) => {
                self.tombstones.remove(&add.path);
                self.files.insert(add.path.clone(), add);
            }
            Action::Remove(rm) => {
                // Removing an absent path is fine; replay must be idempotent.
                self.files.remove(&rm.path);
                self.tombstones.insert(rm.path.clone(), rm);
            }
            Action::Metadata(m) => self.metadata = Some(m),
            Action::Protocol(p) => self.protocol = Some(p),
            Action::CommitInfo(ci) => self.timestamp = Some(ci.timestamp),
        }
    }

    fn from_checkpoint(actions: Vec<Action>) -> Self {
        let mut state = Self::default();
        for action in actions {
            state.apply(action);
        }
        state
    }

    fn digest(&self) -> VersionDigest {
        VersionDigest::compute(
            self.files.values(),
            u64::from(self.metadata.is_some()),
            u64::from(self.protocol.is_some()),
        )
    }
}

/// Rebuilds snapshots from a [`TransactionLogStore`].
#[derive(Debug, Clone)]
pub struct SnapshotBuilder<'a> {
    store: &'a TransactionLogStore,
    cancel: CancelSignal,
}

impl<'a> SnapshotBuilder<'a> {
    /// Builder over `store` with no cancellation.
    pub fn new(store: &'a TransactionLogStore) -> Self {
        Self {
            store,
            cancel: CancelSignal::default(),
        }
    }

    /// Poll `cancel` between file-level steps.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<(), CommitError> {
        ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
        Ok(())
    }

    /// Reconstruct the snapshot as of `as_of` (default: latest version).
    ///
    /// Fails with [`CommitError::VersionNotFound`] when `as_of` is negative,
    /// beyond the latest version, or older than the pruned history.
    pub async fn reconstruct(&self, as_of: Option<i64>) -> Result<Snapshot, CommitError> {
        let versions = self.store.list_versions().await?;
        let (earliest, latest) = match (versions.first(), versions.last()) {
            (Some(&e), Some(&l)) => (e, l),
            _ => {
                return match as_of {
                    Some(requested) => VersionNotFoundSnafu {
                        requested,
                        latest: None::<u64>,
                    }
                    .fail(),
                    None => EmptyLogSnafu.fail(),
                };
            }
        };

        let target = match as_of {
            None => latest,
            Some(requested) => match u64::try_from(requested) {
                Ok(v) if v <= latest && v >= earliest => v,
                _ => {
                    return VersionNotFoundSnafu {
                        requested,
                        latest: Some(latest),
                    }
                    .fail();
                }
            },
        };

        let (mut state, start) = match self.load_checkpoint(earliest, target).await? {
            Some((c, state)) => (state, c + 1),
            None => {
                ensure!(
                    earliest == 0,
                    CorruptStateSnafu {
                        msg: format!(
                            "versions before {earliest} were pruned and no valid checkpoint \
                             covers them"
                        ),
                    }
                );
                (ReplayState::default(), 0)
            }
        };

        for v in start..=target {
            self.check_cancelled()?;
            for action in self.store.read(v).await? {
                state.apply(action);
            }
        }

        // The commit info seen last belongs to `target` only if we replayed it.
        let timestamp = match state.timestamp {
            Some(ts) if start <= target => ts,
            _ => self.store.commit_timestamp(target).await?,
        };

        let metadata = state.metadata.context(CorruptStateSnafu {
            msg: format!("no metadata found in log up to version {target}"),
        })?;
        let protocol = state.protocol.context(CorruptStateSnafu {
            msg: format!("no protocol found in log up to version {target}"),
        })?;

        Ok(Snapshot {
            version: target,
            timestamp,
            files: state.files,
            tombstones: state.tombstones,
            metadata,
            protocol,
        })
    }

    /// Newest usable checkpoint in `[earliest - 1, target]`, validated.
    async fn load_checkpoint(
        &self,
        earliest: u64,
        target: u64,
    ) -> Result<Option<(u64, ReplayState)>, CommitError> {
        let candidates: Vec<u64> = self
            .store
            .list_checkpoints()
            .await?
            .into_iter()
            .filter(|&c| c <= target && c + 1 >= earliest)
            .collect();

        for c in candidates.into_iter().rev() {
            self.check_cancelled()?;
            match self.validated_checkpoint(c).await {
                Ok(state) => {
                    debug!("starting replay from checkpoint {c}");
                    return Ok(Some((c, state)));
                }
                Err(e @ CommitError::Cancelled { .. }) => return Err(e),
                Err(e) => warn!("ignoring checkpoint at version {c}: {e}"),
            }
        }
        Ok(None)
    }

    async fn validated_checkpoint(&self, version: u64) -> Result<ReplayState, CommitError> {
        let state = ReplayState::from_checkpoint(self.store.read_checkpoint(version).await?);
        match self.store.read_digest(version).await? {
            Some(expected) => {
                if let Some(msg) = state.digest().mismatch(&expected) {
                    return CorruptCheckpointSnafu { version, msg }.fail();
                }
            }
            None => debug!("no digest for checkpoint {version}; accepting it unvalidated"),
        }
        ensure!(
            state.metadata.is_some() && state.protocol.is_some(),
            CorruptCheckpointSnafu {
                version,
                msg: "checkpoint lacks metadata or protocol".to_string(),
            }
        );
        Ok(state)
    }
}

impl TransactionLogStore {
    /// Reconstruct the snapshot as of `as_of` without cancellation support.
    pub async fn reconstruct(&self, as_of: Option<i64>) -> Result<Snapshot, CommitError> {
        SnapshotBuilder::new(self).reconstruct(as_of).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RetryPolicy, TableLocation};
    use crate::test_util::{add_file, commit_info, sample_metadata};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn create_test_log_store() -> (TempDir, TransactionLogStore) {
        let tmp = TempDir::new().expect("create temp dir");
        let location = TableLocation::local(tmp.path());
        let store = TransactionLogStore::new(location).with_read_retry(RetryPolicy::no_retry());
        (tmp, store)
    }

    fn remove(path: &str, ts: i64) -> Action {
        Action::Remove(add_file(path, 10).to_remove(ts, true))
    }

    async fn seed(store: &TransactionLogStore) -> TestResult {
        store
            .append(
                0,
                &[
                    Action::Protocol(Protocol::default()),
                    Action::Metadata(sample_metadata()),
                    Action::Add(add_file("a.parquet", 10)),
                    Action::CommitInfo(commit_info("CREATE TABLE", 1_000)),
                ],
            )
            .await?;
        store
            .append(
                1,
                &[
                    Action::Add(add_file("b.parquet", 20)),
                    Action::CommitInfo(commit_info("WRITE", 2_000)),
                ],
            )
            .await?;
        store
            .append(
                2,
                &[
                    remove("a.parquet", 3_000),
                    Action::CommitInfo(commit_info("DELETE", 3_000)),
                ],
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn reconstruct_each_version() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;

        let v0 = store.reconstruct(Some(0)).await?;
        assert_eq!(v0.file_paths(), vec!["a.parquet"]);
        assert_eq!(v0.timestamp, 1_000);

        let v1 = store.reconstruct(Some(1)).await?;
        assert_eq!(v1.file_paths(), vec!["a.parquet", "b.parquet"]);

        let latest = store.reconstruct(None).await?;
        assert_eq!(latest.version, 2);
        assert_eq!(latest.file_paths(), vec!["b.parquet"]);
        assert!(latest.tombstones.contains_key("a.parquet"));
        assert_eq!(latest.size_bytes(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_versions_are_not_found() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;

        for bad in [-1, 3] {
            let err = store.reconstruct(Some(bad)).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    CommitError::VersionNotFound { requested, latest: Some(2), .. }
                        if requested == bad
                ),
                "{err}"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn empty_log_is_reported() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        assert!(matches!(
            store.reconstruct(None).await.unwrap_err(),
            CommitError::EmptyLog { .. }
        ));
        assert!(matches!(
            store.reconstruct(Some(0)).await.unwrap_err(),
            CommitError::VersionNotFound { latest: None, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn remove_of_absent_path_is_tolerated() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;
        store.append(3, &[remove("never-added.parquet", 4_000)]).await?;

        let snap = store.reconstruct(None).await?;
        assert_eq!(snap.file_paths(), vec!["b.parquet"]);
        // No commit info in version 3: falls back to the file's mtime.
        assert!(snap.timestamp > 3_000);
        Ok(())
    }

    #[tokio::test]
    async fn re_added_path_clears_its_tombstone() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;
        store
            .append(3, &[Action::Add(add_file("a.parquet", 10))])
            .await?;

        let snap = store.reconstruct(None).await?;
        assert!(snap.files.contains_key("a.parquet"));
        assert!(!snap.tombstones.contains_key("a.parquet"));
        Ok(())
    }

    #[tokio::test]
    async fn checkpoint_replay_matches_full_replay() -> TestResult {
        let (tmp, store) = create_test_log_store();
        seed(&store).await?;
        let full_at_1 = store.reconstruct(Some(1)).await?;
        let full_at_2 = store.reconstruct(Some(2)).await?;
        store
            .write_checkpoint(1, &full_at_1.checkpoint_actions(i64::MIN))
            .await?;
        store.write_digest(1, &full_at_1.digest()).await?;

        // Without version 0 only the checkpoint can explain the state.
        std::fs::remove_file(tmp.path().join("_delta_log/00000000000000000000.json"))?;

        let via_checkpoint = store.reconstruct(Some(1)).await?;
        assert_eq!(via_checkpoint, full_at_1);

        let via_checkpoint = store.reconstruct(Some(2)).await?;
        assert_eq!(via_checkpoint.files, full_at_2.files);
        assert_eq!(via_checkpoint.tombstones, full_at_2.tombstones);
        assert_eq!(via_checkpoint.metadata, full_at_2.metadata);
        assert_eq!(via_checkpoint.timestamp, full_at_2.timestamp);

        // Version 0 is gone and no checkpoint covers it.
        let err = store.reconstruct(Some(0)).await.unwrap_err();
        assert!(matches!(err, CommitError::VersionNotFound { .. }));
        Ok(())
    }

    #[test]
    fn apply_version_matches_replay_rules() {
        let mut snap = Snapshot {
            version: 0,
            timestamp: 0,
            files: BTreeMap::from([("a.parquet".to_string(), add_file("a.parquet", 1))]),
            tombstones: BTreeMap::new(),
            metadata: sample_metadata(),
            protocol: Protocol::default(),
        };
        snap.apply_version(
            1,
            &[
                remove("a.parquet", 50),
                Action::Add(add_file("b.parquet", 2)),
                Action::CommitInfo(commit_info("WRITE", 60)),
            ],
        );
        assert_eq!(snap.version, 1);
        assert_eq!(snap.timestamp, 60);
        assert_eq!(snap.file_paths(), vec!["b.parquet"]);
        assert!(snap.tombstones.contains_key("a.parquet"));
    }

    #[tokio::test]
    async fn checkpoint_disagreeing_with_digest_is_ignored() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;
        let at1 = store.reconstruct(Some(1)).await?;
        store.write_digest(1, &at1.digest()).await?;

        // A checkpoint that lost a file.
        let mut broken = at1.clone();
        broken.files.remove("b.parquet");
        store
            .write_checkpoint(1, &broken.checkpoint_actions(i64::MIN))
            .await?;

        let snap = store.reconstruct(None).await?;
        assert_eq!(snap.file_paths(), vec!["b.parquet"]);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_replay_stops() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        seed(&store).await?;
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = SnapshotBuilder::new(&store)
            .with_cancel(cancel)
            .reconstruct(None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::Cancelled { .. }));
        Ok(())
    }

    #[test]
    fn checkpoint_actions_drop_expired_tombstones() {
        let mut tombstones = BTreeMap::new();
        for (path, ts) in [("old.parquet", 100), ("recent.parquet", 900)] {
            tombstones.insert(path.to_string(), add_file(path, 1).to_remove(ts, true));
        }
        let snap = Snapshot {
            version: 5,
            timestamp: 0,
            files: BTreeMap::new(),
            tombstones,
            metadata: sample_metadata(),
            protocol: Protocol::default(),
        };

        let actions = snap.checkpoint_actions(500);
        let removed: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Remove(r) => Some(r.path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec!["recent.parquet"]);
        assert!(matches!(actions[0], Action::Protocol(_)));
        assert!(matches!(actions[1], Action::Metadata(_)));
    }
}
