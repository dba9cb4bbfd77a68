//! OPTIMIZE: bin-packing compaction of small files.
//!
//! Compaction is a commit like any other. Small files are grouped per
//! partition, each bin is rewritten into one file, and the commit removes
//! the inputs and adds the output with `data_change = false`. A concurrent
//! DML that removes one of the inputs makes the commit fail with
//! [`TableError::ConcurrentModification`]; the job can simply be rerun.
use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, info};
use snafu::prelude::*;

use crate::table::{
    LakeTable,
    error::{DataFileSnafu, SchemaSnafu, TableError},
    partition::{PartitionValues, partition_dir},
    transaction::{CommitOptions, Operation},
};
use crate::transaction_log::{Action, AddFile};

/// Settings for [`LakeTable::optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Output file size; defaults to `EngineConfig::target_file_size`.
    pub target_file_size: Option<u64>,
    /// Files smaller than this are candidates; defaults to
    /// `EngineConfig::min_file_size`.
    pub min_file_size: Option<u64>,
    /// Only compact partitions whose values include all of these.
    pub partition_filter: PartitionValues,
}

/// Outcome of OPTIMIZE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeMetrics {
    /// Version committed, or `None` when there was nothing to compact.
    pub version: Option<u64>,
    /// Files written.
    pub num_files_added: u64,
    /// Files replaced.
    pub num_files_removed: u64,
    /// Bytes written.
    pub bytes_added: u64,
    /// Bytes replaced.
    pub bytes_removed: u64,
    /// Bins rewritten.
    pub num_bins: u64,
    /// Live files examined.
    pub total_considered_files: u64,
    /// Live files left alone.
    pub total_files_skipped: u64,
}

/// Group candidate files into bins of at most `target` bytes, per
/// partition, smallest first. Bins with a single file are dropped.
fn plan_bins<'a>(candidates: Vec<&'a AddFile>, target: u64) -> Vec<Vec<&'a AddFile>> {
    let mut by_partition: BTreeMap<&PartitionValues, Vec<&AddFile>> = BTreeMap::new();
    for add in candidates {
        by_partition
            .entry(&add.partition_values)
            .or_default()
            .push(add);
    }

    let mut bins = Vec::new();
    for (_, mut files) in by_partition {
        files.sort_by(|a, b| a.size_bytes.cmp(&b.size_bytes).then(a.path.cmp(&b.path)));
        let mut current: Vec<&AddFile> = Vec::new();
        let mut current_size = 0u64;
        for add in files {
            if !current.is_empty() && current_size + add.size_bytes > target {
                bins.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current_size += add.size_bytes;
            current.push(add);
        }
        bins.push(current);
    }
    bins.retain(|bin| bin.len() > 1);
    bins
}

impl LakeTable {
    /// Compact small live files.
    pub async fn optimize(&self, options: OptimizeOptions) -> Result<OptimizeMetrics, TableError> {
        let base = self.snapshot().await?;
        let schema = base.schema().context(SchemaSnafu)?;
        let target = options
            .target_file_size
            .unwrap_or(self.config.target_file_size);
        let min = options.min_file_size.unwrap_or(self.config.min_file_size);

        let in_scope = |add: &AddFile| {
            options
                .partition_filter
                .iter()
                .all(|(k, v)| add.partition_values.get(k) == Some(v))
        };
        let considered: Vec<&AddFile> = base.files.values().filter(|a| in_scope(*a)).collect();
        let total_considered = considered.len() as u64;
        let candidates = considered
            .into_iter()
            .filter(|a| a.size_bytes < min)
            .collect();
        let bins = plan_bins(candidates, target);

        let mut metrics = OptimizeMetrics {
            total_considered_files: total_considered,
            num_bins: bins.len() as u64,
            ..OptimizeMetrics::default()
        };
        if bins.is_empty() {
            metrics.total_files_skipped = total_considered;
            debug!("optimize found nothing to compact at {}", self.location);
            return Ok(metrics);
        }

        let now = Utc::now().timestamp_millis();
        let mut actions = Vec::new();
        for bin in &bins {
            let mut batches = Vec::new();
            for add in bin {
                batches.extend(
                    self.codec
                        .read(&self.location, &add.path)
                        .await
                        .context(DataFileSnafu)?,
                );
                actions.push(Action::Remove(add.to_remove(now, false)));
                metrics.num_files_removed += 1;
                metrics.bytes_removed += add.size_bytes;
            }
            // All inputs of a bin share their partition values.
            let values = bin[0].partition_values.clone();
            let dir = partition_dir(&base.metadata.partition_columns, &values);
            let written = self
                .codec
                .write(&self.location, &dir, schema.to_arrow_schema_ref(), &batches)
                .await
                .context(DataFileSnafu)?;
            debug!(
                "optimize bin of {} files -> {} ({} bytes)",
                bin.len(),
                written.path,
                written.size_bytes
            );
            metrics.num_files_added += 1;
            metrics.bytes_added += written.size_bytes;
            actions.push(Action::Add(written.into_add(values, false)));
        }
        metrics.total_files_skipped = total_considered - metrics.num_files_removed;

        let commit_options = CommitOptions {
            extra_metrics: BTreeMap::from([
                ("numFilesAdded".to_string(), metrics.num_files_added.to_string()),
                ("numFilesRemoved".to_string(), metrics.num_files_removed.to_string()),
                ("numBatches".to_string(), metrics.num_bins.to_string()),
                ("totalConsideredFiles".to_string(), total_considered.to_string()),
                ("totalFilesSkipped".to_string(), metrics.total_files_skipped.to_string()),
            ]),
            ..CommitOptions::default()
        };
        let result = self
            .commit_with_options(
                &base,
                actions,
                Operation::Optimize { target_size: target },
                commit_options,
            )
            .await?;
        info!(
            "optimize at {} rewrote {} files into {} (version {})",
            self.location, metrics.num_files_removed, metrics.num_files_added, result.version
        );
        metrics.version = Some(result.version);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableLocation;
    use crate::table::CreateOptions;
    use crate::test_util::{add_file, sample_batch, sample_schema};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn bins_respect_target_and_drop_singletons() {
        let files = [
            add_file("a", 10),
            add_file("b", 20),
            add_file("c", 30),
            add_file("d", 90),
        ];
        let bins = plan_bins(files.iter().collect(), 60);
        let names: Vec<Vec<&str>> = bins
            .iter()
            .map(|bin| bin.iter().map(|a| a.path.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn bins_never_mix_partitions() {
        let mut uk = add_file("uk", 1);
        uk.partition_values.insert("country".into(), Some("UK".into()));
        let mut fr = add_file("fr", 1);
        fr.partition_values.insert("country".into(), Some("FR".into()));
        assert!(plan_bins(vec![&uk, &fr], 100).is_empty());
    }

    #[tokio::test]
    async fn optimize_compacts_without_changing_rows() -> TestResult {
        let tmp = TempDir::new()?;
        let table = LakeTable::new(TableLocation::local(tmp.path()));
        table
            .create(sample_schema(), CreateOptions::default(), Vec::new())
            .await?;
        for id in 0..4 {
            table.insert(vec![sample_batch(&[id], &[Some("UK")])]).await?;
        }
        let before = table.snapshot().await?;
        let rows_before: usize = table.scan(&before).await?.iter().map(|b| b.num_rows()).sum();

        let metrics = table.optimize(OptimizeOptions::default()).await?;
        assert_eq!(metrics.version, Some(5));
        assert_eq!(metrics.num_files_removed, 4);
        assert_eq!(metrics.num_files_added, 1);
        assert_eq!(metrics.total_files_skipped, 0);

        let after = table.snapshot().await?;
        assert_eq!(after.num_files(), 1);
        assert!(after.files.values().all(|a| !a.data_change));
        let rows_after: usize = table.scan(&after).await?.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows_after, rows_before);

        let history = table.history(Some(1)).await?;
        assert_eq!(history[0].operation, "OPTIMIZE");
        assert_eq!(history[0].operation_metrics["numAddedFiles"], "0");
        assert_eq!(history[0].operation_metrics["numMaintenanceRemovedFiles"], "4");
        Ok(())
    }

    #[tokio::test]
    async fn optimize_with_nothing_to_do_does_not_commit() -> TestResult {
        let tmp = TempDir::new()?;
        let table = LakeTable::new(TableLocation::local(tmp.path()));
        table
            .create(
                sample_schema(),
                CreateOptions::default(),
                vec![sample_batch(&[1], &[Some("UK")])],
            )
            .await?;

        let metrics = table.optimize(OptimizeOptions::default()).await?;
        assert_eq!(metrics.version, None);
        assert_eq!(metrics.total_files_skipped, 1);
        assert_eq!(table.version().await?, 0);
        Ok(())
    }
}
