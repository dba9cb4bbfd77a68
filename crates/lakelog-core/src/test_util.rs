//! Fixtures shared by unit tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeMap, sync::Arc};

use arrow::{
    array::{Int64Array, StringArray},
    record_batch::RecordBatch,
};

use crate::transaction_log::{
    AddFile, CommitInfo, FieldType, FileStats, Format, Metadata, SchemaField, TableSchema,
};

pub(crate) fn add_file(path: &str, size_bytes: u64) -> AddFile {
    AddFile {
        path: path.to_string(),
        partition_values: BTreeMap::new(),
        size_bytes,
        modification_time: 1_700_000_000_000,
        data_change: true,
        stats: Some(FileStats { num_records: 1 }.to_json()),
    }
}

pub(crate) fn sample_schema() -> TableSchema {
    TableSchema::new(vec![
        SchemaField::new("id", FieldType::Long, false),
        SchemaField::new("country", FieldType::String, true),
    ])
    .expect("valid schema")
}

pub(crate) fn sample_metadata() -> Metadata {
    Metadata {
        id: "5f1c2c4e-0000-4000-8000-000000000001".to_string(),
        name: None,
        description: None,
        format: Format::default(),
        schema_string: sample_schema().to_json().expect("schema json"),
        partition_columns: Vec::new(),
        configuration: BTreeMap::new(),
        created_time: Some(1_700_000_000_000),
    }
}

pub(crate) fn commit_info(operation: &str, timestamp: i64) -> CommitInfo {
    CommitInfo {
        timestamp,
        operation: operation.to_string(),
        operation_parameters: BTreeMap::new(),
        operation_metrics: BTreeMap::new(),
        user_metadata: None,
        read_version: None,
        is_blind_append: None,
        engine_info: None,
    }
}

/// Batch matching [`sample_schema`].
pub(crate) fn sample_batch(ids: &[i64], countries: &[Option<&str>]) -> RecordBatch {
    RecordBatch::try_new(
        sample_schema().to_arrow_schema_ref(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(countries.to_vec())),
        ],
    )
    .expect("valid batch")
}
