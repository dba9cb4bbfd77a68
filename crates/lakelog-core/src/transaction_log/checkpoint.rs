//! Parquet encoding of checkpoints.
//!
//! A checkpoint stores the flattened state at a version as one row per
//! action:
//!
//! | column        | type          | contents                                  |
//! |---------------|---------------|-------------------------------------------|
//! | `action_type` | Utf8          | `protocol`, `metaData`, `add`, `remove`   |
//! | `path`        | Utf8 (null)   | data file path for add/remove             |
//! | `size`        | Int64 (null)  | file size for add/remove when known       |
//! | `action_json` | Utf8          | the action in its log-line JSON form      |
//!
//! `path` and `size` are projections for tools that inspect checkpoints;
//! decoding relies on `action_json` alone.
use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, Int64Builder, StringArray, StringBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    errors::ParquetError,
    file::properties::WriterProperties,
};

use crate::transaction_log::Action;

const ACTION_TYPE: &str = "action_type";
const PATH: &str = "path";
const SIZE: &str = "size";
const ACTION_JSON: &str = "action_json";

fn checkpoint_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(ACTION_TYPE, DataType::Utf8, false),
        Field::new(PATH, DataType::Utf8, true),
        Field::new(SIZE, DataType::Int64, true),
        Field::new(ACTION_JSON, DataType::Utf8, false),
    ]))
}

fn action_type(action: &Action) -> &'static str {
    match action {
        Action::Add(_) => "add",
        Action::Remove(_) => "remove",
        Action::Metadata(_) => "metaData",
        Action::CommitInfo(_) => "commitInfo",
        Action::Protocol(_) => "protocol",
    }
}

fn json_error(e: serde_json::Error) -> ParquetError {
    ParquetError::External(Box::new(e))
}

/// Encode flattened actions as a Parquet checkpoint.
pub fn encode_checkpoint(actions: &[Action]) -> Result<Vec<u8>, ParquetError> {
    let mut types = StringBuilder::new();
    let mut paths = StringBuilder::new();
    let mut sizes = Int64Builder::new();
    let mut jsons = StringBuilder::new();

    for action in actions {
        types.append_value(action_type(action));
        paths.append_option(action.path());
        let size = match action {
            Action::Add(a) => Some(a.size_bytes),
            Action::Remove(r) => r.size_bytes,
            _ => None,
        };
        sizes.append_option(size.and_then(|s| i64::try_from(s).ok()));
        jsons.append_value(serde_json::to_string(action).map_err(json_error)?);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(types.finish()),
        Arc::new(paths.finish()),
        Arc::new(sizes.finish()),
        Arc::new(jsons.finish()),
    ];
    let batch = RecordBatch::try_new(checkpoint_schema(), columns)?;

    let mut buf = Vec::new();
    {
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    Ok(buf)
}

/// Decode a Parquet checkpoint back into its actions.
pub fn decode_checkpoint(data: Bytes) -> Result<Vec<Action>, ParquetError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;

    let mut actions = Vec::new();
    for batch in reader {
        let batch = batch?;
        let idx = batch.schema().index_of(ACTION_JSON)?;
        let column = batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| {
                ParquetError::from(ArrowError::SchemaError(format!(
                    "column {ACTION_JSON} is not Utf8"
                )))
            })?;
        for i in 0..column.len() {
            if column.is_null(i) {
                return Err(ParquetError::General(format!(
                    "null {ACTION_JSON} at row {i}"
                )));
            }
            actions.push(serde_json::from_str(column.value(i)).map_err(json_error)?);
        }
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{add_file, sample_metadata};
    use crate::transaction_log::Protocol;

    #[test]
    fn checkpoint_round_trips_flattened_state() -> Result<(), Box<dyn std::error::Error>> {
        let add = add_file("part-1.parquet", 42);
        let remove = add_file("part-0.parquet", 7).to_remove(1_000, true);
        let actions = vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(sample_metadata()),
            Action::Add(add),
            Action::Remove(remove),
        ];

        let bytes = encode_checkpoint(&actions)?;
        assert_eq!(&bytes[..4], b"PAR1");

        let decoded = decode_checkpoint(Bytes::from(bytes))?;
        assert_eq!(decoded, actions);
        Ok(())
    }

    #[test]
    fn decode_rejects_non_parquet_bytes() {
        assert!(decode_checkpoint(Bytes::from_static(b"not a checkpoint")).is_err());
    }
}
