//! VACUUM: physical deletion of data files that no snapshot within the
//! retention window can reference.
//!
//! Two kinds of files are eligible:
//! - tombstoned files whose remove is older than the retention window, and
//! - untracked files (never committed, or whose tombstone was dropped by a
//!   checkpoint) last modified before the window.
//!
//! Live files are never deleted, whatever the retention. Hidden paths
//! (`_delta_log/`, temp files) are never listed. Vacuum does not commit a
//! version.
use std::{
    collections::BTreeSet,
    path::{Component, Path},
};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use snafu::prelude::*;

use crate::cancel::CancelSignal;
use crate::storage::{self, StorageError, layout::is_hidden_rel_path};
use crate::table::{
    LakeTable,
    error::{CancelledSnafu, RetentionTooLowSnafu, StorageSnafu, TableError},
};
use crate::transaction_log::table_config::retention_cutoff;

/// Settings for [`LakeTable::vacuum`].
#[derive(Debug, Clone, Default)]
pub struct VacuumOptions {
    /// Retention window in hours; defaults to the table's
    /// `delta.deletedFileRetentionDuration`.
    pub retain_hours: Option<f64>,
    /// Report candidates without deleting them.
    pub dry_run: bool,
    /// Bypass the retention guardrail.
    pub force: bool,
    /// Reference time; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
    /// Checked between files.
    pub cancel: CancelSignal,
}

impl VacuumOptions {
    /// Use a retention window of `hours`.
    pub fn retain_hours(mut self, hours: f64) -> Self {
        self.retain_hours = Some(hours);
        self
    }

    /// Only report what would be deleted.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Allow a retention window below the table minimum.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Outcome of VACUUM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumMetrics {
    /// Eligible files (deleted, or to be deleted in a dry run), sorted.
    pub files: Vec<String>,
    /// Files deleted by this call.
    pub deleted_count: u64,
    /// Bytes of the eligible files.
    pub deleted_bytes: u64,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Relative data paths only; anything that could escape the table root is
/// left alone.
fn is_safe_rel_path(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

impl LakeTable {
    /// Delete files no snapshot within the retention window references.
    ///
    /// Fails with [`TableError::RetentionTooLow`] when the window is
    /// negative, or shorter than the table's deleted-file retention while
    /// the guardrail is enabled and `force` is not set. Nothing is deleted
    /// in that case.
    pub async fn vacuum(&self, options: VacuumOptions) -> Result<VacuumMetrics, TableError> {
        let snapshot = self.snapshot_with_cancel(None, &options.cancel).await?;
        let minimum_hours = snapshot.table_config().deleted_file_retention_hours();
        let requested_hours = options.retain_hours.unwrap_or(minimum_hours);

        let guarded = self.config.retention_duration_check_enabled && !options.force;
        ensure!(
            requested_hours >= 0.0 && !(guarded && requested_hours < minimum_hours),
            RetentionTooLowSnafu {
                requested_hours,
                minimum_hours,
            }
        );

        let now = options.now.unwrap_or_else(Utc::now);
        // Float-to-int casts saturate; a window too long to represent keeps
        // every file.
        let cutoff = TimeDelta::try_milliseconds((requested_hours * 3_600_000.0) as i64)
            .map_or(DateTime::<Utc>::MIN_UTC, |window| retention_cutoff(now, window));
        let cutoff_ms = cutoff.timestamp_millis();

        let mut candidates: BTreeSet<String> = snapshot
            .tombstones
            .values()
            .filter(|r| r.deletion_timestamp < cutoff_ms)
            .map(|r| r.path.clone())
            .collect();

        let listed = storage::list_files_recursive(self.location.as_ref(), is_hidden_rel_path)
            .await
            .context(StorageSnafu)?;
        for meta in listed {
            if is_hidden_rel_path(&meta.rel_path) || meta.last_modified >= cutoff {
                continue;
            }
            let Some(path) = meta.rel_path.to_str() else {
                continue;
            };
            if !snapshot.tombstones.contains_key(path) {
                candidates.insert(path.to_string());
            }
        }
        candidates.retain(|p| !snapshot.files.contains_key(p) && is_safe_rel_path(p));
        debug!(
            "vacuum at {}: {} candidates older than {cutoff}",
            self.location,
            candidates.len()
        );

        let mut metrics = VacuumMetrics {
            dry_run: options.dry_run,
            ..VacuumMetrics::default()
        };
        for path in candidates {
            ensure!(!options.cancel.is_cancelled(), CancelledSnafu);
            let rel = Path::new(&path);
            let size = match storage::head(self.location.as_ref(), rel).await {
                Ok(meta) => meta.size_bytes,
                Err(StorageError::NotFound { .. }) => continue,
                Err(source) => return Err(source).context(StorageSnafu),
            };
            if !options.dry_run {
                if storage::delete(self.location.as_ref(), rel)
                    .await
                    .context(StorageSnafu)?
                {
                    metrics.deleted_count += 1;
                }
                debug!("vacuum deleted {path}");
            }
            metrics.deleted_bytes += size;
            metrics.files.push(path);
        }

        info!(
            "vacuum at {} {} {} files ({} bytes)",
            self.location,
            if options.dry_run { "found" } else { "deleted" },
            metrics.files.len(),
            metrics.deleted_bytes
        );
        Ok(metrics)
    }
}
