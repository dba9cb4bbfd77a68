//! Checkpoints, log pruning and VACUUM against a real table directory.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use arrow::array::Int64Array;
use chrono::{TimeDelta, Utc};
use common::*;
use lakelog_core::{
    config::EngineConfig,
    storage::layout,
    table::{CreateOptions, LakeTable, Predicate, TableError, VacuumOptions},
};
use tempfile::TempDir;

fn id_eq(id: i64) -> Predicate {
    Predicate::eq("id", Arc::new(Int64Array::from(vec![id])))
}

/// Versions 0..=4 with an engine checkpoint every two versions.
async fn five_versions(tmp: &TempDir) -> Result<LakeTable, TableError> {
    let table = table_with_config(tmp, EngineConfig::default().with_checkpoint_interval(2));
    create_empty(&table).await?;
    for id in 1..=4 {
        table.insert(vec![batch(&[id], &[None])]).await?;
    }
    Ok(table)
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn auto_checkpoints_follow_the_interval() -> TestResult {
    init_logging();
    let tmp = TempDir::new()?;
    let table = five_versions(&tmp).await?;

    assert_eq!(table.log_store().list_checkpoints().await?, vec![2, 4]);
    let last = table.log_store().read_last_checkpoint().await?.unwrap();
    assert_eq!(last.version, 4);
    Ok(())
}

#[tokio::test]
async fn checkpoint_start_matches_full_replay() -> TestResult {
    let tmp = TempDir::new()?;
    let table = table(&tmp);
    create_empty(&table).await?;
    table.insert(vec![batch(&[1, 2], &[None, None])]).await?;
    table.delete_where(&id_eq(1)).await?;
    let replayed = table.snapshot().await?;

    assert_eq!(table.checkpoint().await?, 2);

    // A fresh handle starts from the checkpoint.
    let reopened = LakeTable::open(table.location().clone()).await?;
    assert_eq!(reopened.snapshot().await?, replayed);
    assert_eq!(ids(&reopened).await?, vec![2]);
    Ok(())
}

#[tokio::test]
async fn unreadable_checkpoint_falls_back_to_replay() -> TestResult {
    let tmp = TempDir::new()?;
    let table = five_versions(&tmp).await?;
    let expected = table.snapshot().await?;

    std::fs::write(
        tmp.path().join(layout::checkpoint_rel_path(4)),
        b"not a parquet file",
    )?;

    let snapshot = table.snapshot().await?;
    assert_eq!(snapshot, expected);
    assert_eq!(ids(&table).await?, vec![1, 2, 3, 4]);
    Ok(())
}

// =============================================================================
// Log retention
// =============================================================================

#[tokio::test]
async fn pruning_removes_the_covered_prefix_only() -> TestResult {
    let tmp = TempDir::new()?;
    let table = five_versions(&tmp).await?;
    let expected = table.snapshot().await?;

    // Everything is within the default 30 day retention right now.
    assert_eq!(table.cleanup_expired_logs(Utc::now()).await?, 0);

    let later = Utc::now() + TimeDelta::days(31);
    assert_eq!(table.cleanup_expired_logs(later).await?, 4);
    assert_eq!(table.log_store().list_versions().await?, vec![4]);
    assert_eq!(table.log_store().list_checkpoints().await?, vec![4]);

    assert_eq!(table.snapshot().await?, expected);
    assert!(matches!(
        table.snapshot_at_version(3).await,
        Err(TableError::VersionNotFound {
            requested: 3,
            latest: Some(4)
        })
    ));

    // The log keeps growing from the checkpoint.
    table.insert(vec![batch(&[5], &[None])]).await?;
    assert_eq!(ids(&table).await?, vec![1, 2, 3, 4, 5]);
    Ok(())
}

// =============================================================================
// VACUUM
// =============================================================================

#[tokio::test]
async fn vacuum_below_retention_is_refused_and_deletes_nothing() -> TestResult {
    let tmp = TempDir::new()?;
    let table = table(&tmp);
    create_empty(&table).await?;
    table.insert(vec![batch(&[1], &[None])]).await?;
    let tombstoned = paths(&table.snapshot().await?);
    table.delete_where(&id_eq(1)).await?;

    let err = table
        .vacuum(VacuumOptions::default().retain_hours(0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::RetentionTooLow { .. }));
    for path in &tombstoned {
        assert!(tmp.path().join(path).is_file());
    }
    Ok(())
}

#[tokio::test]
async fn vacuum_keeps_live_files_and_hidden_paths() -> TestResult {
    init_logging();
    let tmp = TempDir::new()?;
    let table = table(&tmp);
    create_empty(&table).await?;
    table.insert(vec![batch(&[1], &[None])]).await?;
    table.insert(vec![batch(&[2], &[None])]).await?;
    table.delete_where(&id_eq(1)).await?;

    std::fs::write(tmp.path().join("stray.parquet"), b"orphan")?;
    std::fs::create_dir_all(tmp.path().join("_staging"))?;
    std::fs::write(tmp.path().join("_staging/pending.parquet"), b"hidden")?;

    let live = paths(&table.snapshot().await?);
    let options = VacuumOptions {
        now: Some(Utc::now() + TimeDelta::hours(1)),
        ..VacuumOptions::default().retain_hours(0.0).force()
    };

    let preview = table.vacuum(options.clone().dry_run()).await?;
    assert_eq!(preview.files.len(), 2);
    assert_eq!(preview.deleted_count, 0);
    assert!(preview.files.contains(&"stray.parquet".to_string()));

    let metrics = table.vacuum(options).await?;
    assert_eq!(metrics.files, preview.files);
    assert_eq!(metrics.deleted_count, 2);
    assert!(!tmp.path().join("stray.parquet").exists());
    assert!(tmp.path().join("_staging/pending.parquet").exists());
    for path in &live {
        assert!(tmp.path().join(path).is_file(), "live file {path} deleted");
    }

    // No version is committed and the table still reads.
    assert_eq!(table.version().await?, 3);
    assert_eq!(ids(&table).await?, vec![2]);
    Ok(())
}

#[tokio::test]
async fn vacuum_spares_a_file_restored_after_its_removal() -> TestResult {
    let tmp = TempDir::new()?;
    let table = table(&tmp);
    table
        .create(schema(), CreateOptions::default(), vec![batch(&[1], &[None])])
        .await?;
    let original = paths(&table.snapshot().await?);
    table.delete_where(&id_eq(1)).await?;
    table.restore(0).await?;

    let snapshot = table.snapshot().await?;
    assert_eq!(paths(&snapshot), original);
    assert!(snapshot.tombstones.is_empty());

    let metrics = table
        .vacuum(VacuumOptions {
            now: Some(Utc::now() + TimeDelta::hours(1)),
            ..VacuumOptions::default().retain_hours(0.0).force()
        })
        .await?;
    assert!(metrics.files.is_empty());
    assert_eq!(metrics.deleted_count, 0);
    for path in &original {
        assert!(tmp.path().join(path).is_file(), "restored file {path} deleted");
    }
    assert_eq!(ids(&table).await?, vec![1]);
    Ok(())
}
