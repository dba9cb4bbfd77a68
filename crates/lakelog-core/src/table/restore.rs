//! RESTORE to an earlier version or timestamp.
//!
//! A restore is an ordinary commit whose actions reconcile the current
//! snapshot with the target one: files live now but not then are removed,
//! files live then but not now are re-added. The target's metadata is
//! recommitted only when it differs from the current metadata.
use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use snafu::prelude::*;

use crate::storage::{self, StorageError};
use crate::table::{
    LakeTable,
    error::{RestoreFilesMissingSnafu, StorageSnafu, TableError},
    transaction::{CommitOptions, CommitResult, Operation},
};
use crate::transaction_log::{Action, AddFile, Snapshot};

impl LakeTable {
    /// Restore the table to `version`.
    pub async fn restore(&self, version: i64) -> Result<CommitResult, TableError> {
        let target = self.snapshot_at_version(version).await?;
        self.restore_snapshot(&target, None).await
    }

    /// Restore the table to the latest version committed at or before
    /// `timestamp`.
    pub async fn restore_to_timestamp(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<CommitResult, TableError> {
        let target = self.snapshot_at_timestamp(timestamp).await?;
        self.restore_snapshot(
            &target,
            Some(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        )
        .await
    }

    async fn restore_snapshot(
        &self,
        target: &Snapshot,
        timestamp: Option<String>,
    ) -> Result<CommitResult, TableError> {
        let base = self.snapshot().await?;
        let now = Utc::now().timestamp_millis();

        let to_add: Vec<&AddFile> = target
            .files
            .values()
            .filter(|a| !base.files.contains_key(&a.path))
            .collect();
        self.check_files_present(target.version, &to_add).await?;

        let mut actions = Vec::new();
        if target.metadata != base.metadata {
            actions.push(Action::Metadata(target.metadata.clone()));
        }
        let removes: Vec<Action> = base
            .files
            .values()
            .filter(|a| !target.files.contains_key(&a.path))
            .map(|a| Action::Remove(a.to_remove(now, true)))
            .collect();
        let num_removed = removes.len();
        actions.extend(removes);
        actions.extend(to_add.iter().map(|a| {
            Action::Add(AddFile {
                data_change: true,
                ..(*a).clone()
            })
        }));

        let restored_bytes: u64 = to_add.iter().map(|a| a.size_bytes).sum();
        let options = CommitOptions {
            extra_metrics: BTreeMap::from([
                ("numRestoredFiles".to_string(), to_add.len().to_string()),
                ("restoredFilesSize".to_string(), restored_bytes.to_string()),
                ("numRemovedFiles".to_string(), num_removed.to_string()),
                ("tableSizeAfterRestore".to_string(), target.size_bytes().to_string()),
                ("numOfFilesAfterRestore".to_string(), target.num_files().to_string()),
            ]),
            ..CommitOptions::default()
        };
        let operation = Operation::Restore {
            version: target.version,
            timestamp,
        };

        let result = self
            .commit_with_options(&base, actions, operation, options)
            .await?;
        info!(
            "restored {} to version {} as version {}",
            self.location, target.version, result.version
        );
        Ok(result)
    }

    /// Every file to re-add must still exist; vacuum may have deleted it.
    async fn check_files_present(&self, version: u64, adds: &[&AddFile]) -> Result<(), TableError> {
        let mut missing = Vec::new();
        for add in adds {
            match storage::head(self.location.as_ref(), Path::new(&add.path)).await {
                Ok(_) => {}
                Err(StorageError::NotFound { .. }) => missing.push(add.path.clone()),
                Err(source) => return Err(source).context(StorageSnafu),
            }
        }
        ensure!(
            missing.is_empty(),
            RestoreFilesMissingSnafu {
                version,
                paths: missing,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableLocation;
    use crate::table::{CreateOptions, Predicate};
    use crate::test_util::{sample_batch, sample_schema};
    use arrow::array::Int64Array;
    use std::{collections::BTreeSet, sync::Arc};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn paths(s: &Snapshot) -> BTreeSet<String> {
        s.files.keys().cloned().collect()
    }

    async fn three_versions(tmp: &TempDir) -> Result<LakeTable, TableError> {
        let table = LakeTable::new(TableLocation::local(tmp.path()));
        table
            .create(
                sample_schema(),
                CreateOptions::default(),
                vec![sample_batch(&[1], &[Some("UK")])],
            )
            .await?;
        table.insert(vec![sample_batch(&[2], &[Some("FR")])]).await?;
        table
            .delete_where(&Predicate::eq("id", Arc::new(Int64Array::from(vec![1]))))
            .await?;
        Ok(table)
    }

    #[tokio::test]
    async fn restore_reconciles_to_the_target_file_set() -> TestResult {
        let tmp = TempDir::new()?;
        let table = three_versions(&tmp).await?;
        let target = table.snapshot_at_version(0).await?;
        let before = table.snapshot().await?;

        let result = table.restore(0).await?;
        assert_eq!(result.version, 3);

        let after = table.snapshot().await?;
        assert_eq!(paths(&after), paths(&target));

        // The commit is exactly the symmetric difference.
        let actions = table.log_store().read(3).await?;
        let added: BTreeSet<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Add(a) => Some(a.path.clone()),
                _ => None,
            })
            .collect();
        let removed: BTreeSet<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Remove(r) => Some(r.path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(added, paths(&target).difference(&paths(&before)).cloned().collect());
        assert_eq!(removed, paths(&before).difference(&paths(&target)).cloned().collect());
        assert!(!actions.iter().any(|a| matches!(a, Action::Metadata(_))));

        let history = table.history(Some(1)).await?;
        assert_eq!(history[0].operation, "RESTORE");
        assert_eq!(history[0].operation_parameters["version"], "0");
        Ok(())
    }

    #[tokio::test]
    async fn restore_to_current_state_still_commits() -> TestResult {
        let tmp = TempDir::new()?;
        let table = three_versions(&tmp).await?;

        let result = table.restore(2).await?;
        assert_eq!(result.version, 3);
        assert_eq!(result.metrics["numRestoredFiles"], "0");
        assert_eq!(result.metrics["numRemovedFiles"], "0");
        Ok(())
    }

    #[tokio::test]
    async fn restore_fails_when_files_were_vacuumed() -> TestResult {
        let tmp = TempDir::new()?;
        let table = three_versions(&tmp).await?;
        let target = table.snapshot_at_version(0).await?;
        for path in target.files.keys() {
            std::fs::remove_file(tmp.path().join(path))?;
        }

        let err = table.restore(0).await.unwrap_err();
        assert!(matches!(err, TableError::RestoreFilesMissing { version: 0, .. }));
        assert_eq!(table.version().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn restore_to_timestamp_picks_the_version_at_that_time() -> TestResult {
        let tmp = TempDir::new()?;
        let table = three_versions(&tmp).await?;
        let v1 = table.snapshot_at_version(1).await?;
        let at = DateTime::<Utc>::from_timestamp_millis(v1.timestamp).ok_or("timestamp")?;

        table.restore_to_timestamp(at).await?;
        assert_eq!(paths(&table.snapshot().await?), paths(&v1));
        Ok(())
    }

    #[tokio::test]
    async fn restore_to_missing_version_fails() -> TestResult {
        let tmp = TempDir::new()?;
        let table = three_versions(&tmp).await?;
        assert!(matches!(
            table.restore(9).await,
            Err(TableError::VersionNotFound { requested: 9, .. })
        ));
        Ok(())
    }
}
