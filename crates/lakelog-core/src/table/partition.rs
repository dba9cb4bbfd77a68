//! Hive-style partitioning of written rows.
//!
//! Rows are grouped by the values of the table's partition columns and each
//! group lands in `col=value/...` below the table root. Partition columns
//! are also kept inside the data files, so reading a file never depends on
//! its directory name.
use std::collections::BTreeMap;

use arrow::{
    array::{Array, UInt32Array},
    compute::take_record_batch,
    record_batch::RecordBatch,
    util::display::array_value_to_string,
};
use snafu::prelude::*;

use crate::table::error::{ArrowSnafu, SchemaMismatchSnafu, TableError};
use crate::transaction_log::TableSchema;

/// Directory value used for null partition values.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// Partition values of one group of rows.
pub type PartitionValues = BTreeMap<String, Option<String>>;

/// Relative directory for a partition, in partition-column order.
pub fn partition_dir(columns: &[String], values: &PartitionValues) -> String {
    columns
        .iter()
        .map(|c| {
            let v = values
                .get(c)
                .and_then(|v| v.as_deref())
                .unwrap_or(NULL_PARTITION_VALUE);
            format!("{c}={v}")
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check that `batch` has exactly the table's columns, types and order.
pub fn validate_batch(schema: &TableSchema, batch: &RecordBatch) -> Result<(), TableError> {
    let expected = schema.to_arrow_schema();
    let found = batch.schema();
    ensure!(
        expected.fields().len() == found.fields().len(),
        SchemaMismatchSnafu {
            msg: format!(
                "expected {} columns, found {}",
                expected.fields().len(),
                found.fields().len()
            ),
        }
    );
    for (i, (e, f)) in expected.fields().iter().zip(found.fields().iter()).enumerate() {
        ensure!(
            e.name() == f.name() && e.data_type() == f.data_type(),
            SchemaMismatchSnafu {
                msg: format!(
                    "expected column {}: {}, found {}: {}",
                    e.name(),
                    e.data_type(),
                    f.name(),
                    f.data_type()
                ),
            }
        );
        ensure!(
            e.is_nullable() || batch.column(i).null_count() == 0,
            SchemaMismatchSnafu {
                msg: format!("column {} is not nullable but contains nulls", e.name()),
            }
        );
    }
    Ok(())
}

/// Split `batch` into one batch per distinct partition value tuple.
pub fn split_by_partition(
    batch: &RecordBatch,
    columns: &[String],
) -> Result<Vec<(PartitionValues, RecordBatch)>, TableError> {
    if columns.is_empty() {
        return Ok(vec![(PartitionValues::new(), batch.clone())]);
    }

    let mut arrays = Vec::with_capacity(columns.len());
    for c in columns {
        let array = batch.column_by_name(c).context(SchemaMismatchSnafu {
            msg: format!("partition column {c} missing from batch"),
        })?;
        arrays.push(array);
    }

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let mut key = Vec::with_capacity(arrays.len());
        for array in &arrays {
            if array.is_null(row) {
                key.push(None);
            } else {
                key.push(Some(array_value_to_string(array, row).context(ArrowSnafu)?));
            }
        }
        groups.entry(key).or_default().push(row as u32);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, rows) in groups {
        let values: PartitionValues = columns.iter().cloned().zip(key).collect();
        let part = take_record_batch(batch, &UInt32Array::from(rows)).context(ArrowSnafu)?;
        out.push((values, part));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{sample_batch, sample_schema};

    #[test]
    fn splits_rows_by_partition_value() -> Result<(), Box<dyn std::error::Error>> {
        let batch = sample_batch(&[1, 2, 3, 4], &[Some("UK"), Some("FR"), Some("UK"), None]);
        let parts = split_by_partition(&batch, &["country".to_string()])?;

        let summary: Vec<_> = parts
            .iter()
            .map(|(values, b)| (values["country"].clone(), b.num_rows()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (None, 1),
                (Some("FR".to_string()), 1),
                (Some("UK".to_string()), 2)
            ]
        );
        Ok(())
    }

    #[test]
    fn unpartitioned_tables_keep_the_batch_whole() -> Result<(), Box<dyn std::error::Error>> {
        let batch = sample_batch(&[1, 2], &[Some("UK"), Some("FR")]);
        let parts = split_by_partition(&batch, &[])?;
        assert_eq!(parts.len(), 1);
        assert!(parts[0].0.is_empty());
        Ok(())
    }

    #[test]
    fn partition_dir_uses_hive_layout_and_null_marker() {
        let columns = vec!["country".to_string(), "year".to_string()];
        let values = PartitionValues::from([
            ("country".to_string(), Some("UK".to_string())),
            ("year".to_string(), None),
        ]);
        assert_eq!(
            partition_dir(&columns, &values),
            "country=UK/year=__HIVE_DEFAULT_PARTITION__"
        );
    }

    #[test]
    fn validate_batch_rejects_wrong_columns() {
        let schema = sample_schema();
        assert!(validate_batch(&schema, &sample_batch(&[1], &[None])).is_ok());

        let other = RecordBatch::try_new(
            std::sync::Arc::new(arrow::datatypes::Schema::new(vec![
                arrow::datatypes::Field::new("id", arrow::datatypes::DataType::Int64, false),
            ])),
            vec![std::sync::Arc::new(arrow::array::Int64Array::from(vec![1]))],
        )
        .expect("batch");
        assert!(matches!(
            validate_batch(&schema, &other),
            Err(TableError::SchemaMismatch { .. })
        ));
    }
}
