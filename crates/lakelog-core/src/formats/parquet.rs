//! Parquet implementation of [`DataFileCodec`].
use std::path::Path;

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::debug;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    errors::ParquetError,
    file::properties::WriterProperties,
};
use snafu::prelude::*;
use uuid::Uuid;

use crate::formats::{
    ArrowSnafu, DataFileCodec, DataFileError, DecodeSnafu, EncodeSnafu, StorageSnafu, WrittenFile,
};
use crate::storage::{self, TableLocation};

/// Writes `part-00000-<uuid>.parquet` files with default writer properties.
#[derive(Debug, Clone, Default)]
pub struct ParquetDataFiles {
    max_row_group_size: Option<usize>,
}

impl ParquetDataFiles {
    /// Codec with default writer properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of rows per row group.
    pub fn with_max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = Some(rows);
        self
    }

    fn writer_properties(&self) -> WriterProperties {
        let mut builder = WriterProperties::builder();
        if let Some(rows) = self.max_row_group_size {
            builder = builder.set_max_row_group_size(rows);
        }
        builder.build()
    }

    fn encode(&self, schema: SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>, ParquetError> {
        let mut buf = Vec::new();
        {
            let props = self.writer_properties();
            let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))?;
            for batch in batches {
                writer.write(batch)?;
            }
            writer.close()?;
        }
        Ok(buf)
    }
}

fn new_file_name() -> String {
    format!("part-00000-{}.parquet", Uuid::new_v4())
}

#[async_trait]
impl DataFileCodec for ParquetDataFiles {
    fn provider(&self) -> &str {
        "parquet"
    }

    async fn write(
        &self,
        location: &TableLocation,
        rel_dir: &str,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<WrittenFile, DataFileError> {
        let name = new_file_name();
        let path = if rel_dir.is_empty() {
            name
        } else {
            format!("{}/{name}", rel_dir.trim_end_matches('/'))
        };

        let num_records: usize = batches.iter().map(RecordBatch::num_rows).sum();
        let bytes = self
            .encode(schema, batches)
            .context(EncodeSnafu { path: path.clone() })?;

        storage::write_new(location.as_ref(), Path::new(&path), &bytes)
            .await
            .context(StorageSnafu { path: path.clone() })?;
        debug!("wrote data file {path} ({num_records} rows, {} bytes)", bytes.len());

        Ok(WrittenFile {
            path,
            num_records: num_records as u64,
            size_bytes: bytes.len() as u64,
            modification_time: Utc::now().timestamp_millis(),
        })
    }

    async fn read(
        &self,
        location: &TableLocation,
        path: &str,
    ) -> Result<Vec<RecordBatch>, DataFileError> {
        let bytes = storage::read_all_bytes(location.as_ref(), Path::new(path))
            .await
            .context(StorageSnafu { path })?;

        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
            .and_then(|b| b.build())
            .context(DecodeSnafu { path })?;

        reader
            .collect::<Result<Vec<_>, _>>()
            .context(ArrowSnafu { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{sample_batch, sample_schema};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn write_then_read_preserves_rows() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let codec = ParquetDataFiles::new();
        let batch = sample_batch(&[1, 2, 3], &[Some("UK"), None, Some("FR")]);

        let written = codec
            .write(&location, "", sample_schema().to_arrow_schema_ref(), &[batch.clone()])
            .await?;
        assert!(written.path.starts_with("part-00000-"));
        assert!(written.path.ends_with(".parquet"));
        assert_eq!(written.num_records, 3);
        assert_eq!(
            written.size_bytes,
            std::fs::metadata(tmp.path().join(&written.path))?.len()
        );

        let back = codec.read(&location, &written.path).await?;
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].columns(), batch.columns());
        Ok(())
    }

    #[tokio::test]
    async fn writes_into_partition_directory() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let written = ParquetDataFiles::new()
            .write(
                &location,
                "country=UK",
                sample_schema().to_arrow_schema_ref(),
                &[sample_batch(&[1], &[Some("UK")])],
            )
            .await?;

        assert!(written.path.starts_with("country=UK/part-00000-"));
        assert!(tmp.path().join(&written.path).is_file());
        Ok(())
    }

    #[tokio::test]
    async fn read_of_missing_file_is_a_storage_error() -> TestResult {
        let tmp = TempDir::new()?;
        let err = ParquetDataFiles::new()
            .read(&TableLocation::local(tmp.path()), "nope.parquet")
            .await
            .unwrap_err();
        assert!(matches!(err, DataFileError::Storage { .. }));
        Ok(())
    }
}
