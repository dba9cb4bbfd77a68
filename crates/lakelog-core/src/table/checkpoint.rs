//! Checkpoints and log-retention cleanup.
//!
//! A checkpoint at version `c` stores the flattened state of the snapshot at
//! `c`, so readers replay at most the versions after it. Once a checkpoint
//! exists, version files that precede it and are older than
//! `delta.logRetentionDuration` may be deleted. Pruning only removes a
//! prefix of the log, so the remaining versions stay contiguous.
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::table::{LakeTable, error::TableError};
use crate::transaction_log::{Snapshot, table_config::retention_cutoff};

impl LakeTable {
    /// Write a checkpoint at the latest version and return that version.
    pub async fn checkpoint(&self) -> Result<u64, TableError> {
        let snapshot = self.snapshot().await?;
        self.write_checkpoint_for(&snapshot, Utc::now()).await?;
        Ok(snapshot.version)
    }

    /// Checkpoint `snapshot`, dropping tombstones older than the table's
    /// deleted-file retention as of `now`.
    pub(crate) async fn write_checkpoint_for(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<(), TableError> {
        let retention = snapshot.table_config().deleted_file_retention;
        let cutoff_ms = retention_cutoff(now, retention).timestamp_millis();
        let actions = snapshot.checkpoint_actions(cutoff_ms);

        // The digest validates the checkpoint on read.
        if self.store.read_digest(snapshot.version).await?.is_none() {
            self.store
                .write_digest(snapshot.version, &snapshot.digest())
                .await?;
        }
        self.store
            .write_checkpoint(snapshot.version, &actions)
            .await?;
        info!(
            "wrote checkpoint for version {} at {} ({} actions)",
            snapshot.version,
            self.location,
            actions.len()
        );
        Ok(())
    }

    /// Delete version files that are covered by the newest checkpoint and
    /// older than the table's log retention as of `now`.
    ///
    /// Returns the number of version files deleted.
    pub async fn cleanup_expired_logs(&self, now: DateTime<Utc>) -> Result<usize, TableError> {
        let snapshot = self.snapshot().await?;
        self.cleanup_expired_logs_for(&snapshot, now).await
    }

    pub(crate) async fn cleanup_expired_logs_for(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<usize, TableError> {
        let checkpoints = self.store.list_checkpoints().await?;
        let Some(&newest) = checkpoints.last() else {
            debug!("no checkpoint at {}; nothing to prune", self.location);
            return Ok(0);
        };
        let cutoff = retention_cutoff(now, snapshot.table_config().log_retention);

        let mut deleted = 0usize;
        let mut earliest = None;
        for (version, modified) in self.store.version_mtimes().await? {
            if version >= newest || modified >= cutoff {
                earliest = Some(version);
                break;
            }
            self.store.delete_version(version).await?;
            deleted += 1;
        }

        // Checkpoints that can no longer start a replay.
        if let Some(earliest) = earliest {
            for c in checkpoints.into_iter().filter(|&c| c + 1 < earliest) {
                self.store.delete_checkpoint(c).await?;
                debug!("deleted obsolete checkpoint {c}");
            }
        }

        if deleted > 0 {
            info!(
                "deleted {deleted} expired version files before {:?} at {}",
                earliest, self.location
            );
        }
        Ok(deleted)
    }
}
