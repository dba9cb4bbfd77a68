//! Shared fixtures for the integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeSet, sync::Arc};

use arrow::{
    array::{Int64Array, StringArray},
    record_batch::RecordBatch,
};
use lakelog_core::{
    config::EngineConfig,
    storage::TableLocation,
    table::{CreateOptions, LakeTable, TableError},
    transaction_log::{FieldType, SchemaField, Snapshot, TableSchema},
};
use tempfile::TempDir;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn schema() -> TableSchema {
    TableSchema::new(vec![
        SchemaField::new("id", FieldType::Long, false),
        SchemaField::new("region", FieldType::String, true),
    ])
    .expect("valid schema")
}

pub fn batch(ids: &[i64], regions: &[Option<&str>]) -> RecordBatch {
    RecordBatch::try_new(
        schema().to_arrow_schema_ref(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(regions.to_vec())),
        ],
    )
    .expect("valid batch")
}

pub fn table(tmp: &TempDir) -> LakeTable {
    LakeTable::new(TableLocation::local(tmp.path()))
}

pub fn table_with_config(tmp: &TempDir, config: EngineConfig) -> LakeTable {
    table(tmp).with_config(config)
}

/// Create an empty, unpartitioned table.
pub async fn create_empty(table: &LakeTable) -> Result<(), TableError> {
    table
        .create(schema(), CreateOptions::default(), Vec::new())
        .await
        .map(|_| ())
}

pub fn paths(snapshot: &Snapshot) -> BTreeSet<String> {
    snapshot.files.keys().cloned().collect()
}

/// Sorted ids of every row in the latest snapshot.
pub async fn ids(table: &LakeTable) -> Result<Vec<i64>, TableError> {
    let snapshot = table.snapshot().await?;
    let mut out = Vec::new();
    for b in table.scan(&snapshot).await? {
        let col = b
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("id column");
        out.extend(col.values().iter().copied());
    }
    out.sort_unstable();
    Ok(out)
}
