//! Log actions: the atomic entries written to version files.
//!
//! Each version file stores one JSON object per line, and each object holds a
//! single action keyed by its kind:
//!
//! ```text
//! {"commitInfo":{"timestamp":1700000000000,"operation":"WRITE",...}}
//! {"add":{"path":"part-00000-1f0c.parquet","size":1024,"modificationTime":...,"dataChange":true}}
//! {"remove":{"path":"part-00000-9a3e.parquet","deletionTimestamp":...,"dataChange":true}}
//! ```
//!
//! Decoding is tolerant: unknown fields are ignored
//! and lines whose action key is unknown are skipped, so logs written by a
//! newer writer remain readable.
use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

/// Introduces a data file into the live set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    /// Path relative to the table root.
    pub path: String,
    /// Partition column values for this file (empty for unpartitioned tables).
    #[serde(default)]
    pub partition_values: BTreeMap<String, Option<String>>,
    /// File size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Creation time of the file, milliseconds since the Unix epoch.
    pub modification_time: i64,
    /// `false` for maintenance rewrites that do not change table contents.
    pub data_change: bool,
    /// Optional JSON statistics (see [`FileStats`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

impl AddFile {
    /// Parsed statistics, if present and well-formed.
    pub fn parsed_stats(&self) -> Option<FileStats> {
        self.stats
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Number of records recorded in the statistics.
    pub fn num_records(&self) -> Option<u64> {
        self.parsed_stats().map(|s| s.num_records)
    }

    /// The tombstone that retires this file.
    pub fn to_remove(&self, deletion_timestamp: i64, data_change: bool) -> RemoveFile {
        RemoveFile {
            path: self.path.clone(),
            deletion_timestamp,
            data_change,
            size_bytes: Some(self.size_bytes),
            partition_values: self.partition_values.clone(),
        }
    }
}

/// Per-file statistics stored as a JSON string inside [`AddFile::stats`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    /// Number of rows in the file.
    pub num_records: u64,
}

impl FileStats {
    /// Encode as the JSON string stored in the log.
    pub fn to_json(&self) -> String {
        format!("{{\"numRecords\":{}}}", self.num_records)
    }
}

/// Tombstones a data file. The file stays on disk until vacuumed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    /// Path relative to the table root.
    pub path: String,
    /// When the file was logically deleted, milliseconds since the Unix epoch.
    pub deletion_timestamp: i64,
    /// `false` for maintenance rewrites that do not change table contents.
    pub data_change: bool,
    /// Size of the removed file, when known.
    #[serde(rename = "size", default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Partition values of the removed file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partition_values: BTreeMap<String, Option<String>>,
}

/// Data file format descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Format {
    /// Codec name, `"parquet"` for files written by this crate.
    pub provider: String,
    /// Codec options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// Table schema and configuration. The last one replayed wins.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique table identifier; a new id marks a new table generation.
    pub id: String,
    /// Optional user-facing name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Data file format.
    #[serde(default)]
    pub format: Format,
    /// Serialized table schema (see [`crate::transaction_log::TableSchema`]).
    pub schema_string: String,
    /// Columns the table is partitioned by.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Table properties such as `delta.logRetentionDuration`.
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

/// Audit record for a version. Ignored by snapshot reconstruction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Commit time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Operation name, for example `WRITE`, `DELETE` or `OPTIMIZE`.
    pub operation: String,
    /// Operation parameters as recorded by the writer.
    #[serde(default)]
    pub operation_parameters: BTreeMap<String, String>,
    /// File and row metrics computed from the committed actions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operation_metrics: BTreeMap<String, String>,
    /// Free-form user metadata attached to the commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<String>,
    /// Version the writer read before committing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<u64>,
    /// Whether the commit only added files without reading the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    /// Engine identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
}

/// Reader/writer capability gate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Minimum reader version required to read the table.
    pub min_reader_version: i32,
    /// Minimum writer version required to write the table.
    pub min_writer_version: i32,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: 1,
            min_writer_version: 2,
        }
    }
}

/// An action recorded in a version file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    /// Add a data file to the live set.
    #[serde(rename = "add")]
    Add(AddFile),
    /// Tombstone a data file.
    #[serde(rename = "remove")]
    Remove(RemoveFile),
    /// Replace the table metadata.
    #[serde(rename = "metaData")]
    Metadata(Metadata),
    /// Audit record.
    #[serde(rename = "commitInfo")]
    CommitInfo(CommitInfo),
    /// Replace the protocol requirements.
    #[serde(rename = "protocol")]
    Protocol(Protocol),
}

const KNOWN_ACTION_KEYS: [&str; 5] = ["add", "remove", "metaData", "commitInfo", "protocol"];

impl Action {
    /// Data file path touched by this action, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::Add(a) => Some(&a.path),
            Action::Remove(r) => Some(&r.path),
            Action::Metadata(_) | Action::CommitInfo(_) | Action::Protocol(_) => None,
        }
    }
}

/// Encode actions as newline-delimited JSON.
pub fn encode_actions(actions: &[Action]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for action in actions {
        serde_json::to_writer(&mut out, action)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Decode newline-delimited JSON actions.
///
/// Blank lines are ignored. Lines that are JSON objects without any known
/// action key are skipped.
pub fn decode_actions(text: &str) -> Result<Vec<Action>, serde_json::Error> {
    let mut actions = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)?;
        let known = value
            .as_object()
            .map(|obj| obj.keys().any(|k| KNOWN_ACTION_KEYS.contains(&k.as_str())))
            .unwrap_or(false);
        if !known {
            debug!("skipping unrecognized log line: {line}");
            continue;
        }
        actions.push(serde_json::from_value(value)?);
    }
    Ok(actions)
}

/// File and byte counts for a set of actions.
///
/// Maintenance actions (`data_change == false`) are counted separately so
/// that "rows changed" style metrics only reflect user-visible mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSummary {
    /// Data-changing files added.
    pub num_added_files: u64,
    /// Data-changing files removed.
    pub num_removed_files: u64,
    /// Bytes of data-changing files added.
    pub num_added_bytes: u64,
    /// Bytes of data-changing files removed (when sizes are known).
    pub num_removed_bytes: u64,
    /// Rows in data-changing files added (when stats are present).
    pub num_output_rows: u64,
    /// Maintenance files added.
    pub num_maintenance_added_files: u64,
    /// Maintenance files removed.
    pub num_maintenance_removed_files: u64,
}

impl ActionSummary {
    /// Summarize `actions`.
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a Action>) -> Self {
        let mut s = Self::default();
        for action in actions {
            match action {
                Action::Add(add) if add.data_change => {
                    s.num_added_files += 1;
                    s.num_added_bytes += add.size_bytes;
                    s.num_output_rows += add.num_records().unwrap_or(0);
                }
                Action::Add(_) => s.num_maintenance_added_files += 1,
                Action::Remove(rm) if rm.data_change => {
                    s.num_removed_files += 1;
                    s.num_removed_bytes += rm.size_bytes.unwrap_or(0);
                }
                Action::Remove(_) => s.num_maintenance_removed_files += 1,
                Action::Metadata(_) | Action::CommitInfo(_) | Action::Protocol(_) => {}
            }
        }
        s
    }

    /// Render as `CommitInfo.operation_metrics`.
    pub fn to_metrics(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("numAddedFiles".to_string(), self.num_added_files.to_string());
        m.insert(
            "numRemovedFiles".to_string(),
            self.num_removed_files.to_string(),
        );
        m.insert("numAddedBytes".to_string(), self.num_added_bytes.to_string());
        m.insert(
            "numRemovedBytes".to_string(),
            self.num_removed_bytes.to_string(),
        );
        m.insert("numOutputRows".to_string(), self.num_output_rows.to_string());
        if self.num_maintenance_added_files + self.num_maintenance_removed_files > 0 {
            m.insert(
                "numMaintenanceAddedFiles".to_string(),
                self.num_maintenance_added_files.to_string(),
            );
            m.insert(
                "numMaintenanceRemovedFiles".to_string(),
                self.num_maintenance_removed_files.to_string(),
            );
        }
        m
    }
}
