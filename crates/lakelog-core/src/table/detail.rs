//! DESCRIBE DETAIL.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::table::{LakeTable, error::TableError};

/// Summary of a table at its latest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDetail {
    /// Table id from the metadata.
    pub id: String,
    /// Table name, if set.
    pub name: Option<String>,
    /// Table description, if set.
    pub description: Option<String>,
    /// Table root, as a URI.
    pub location: String,
    /// Creation time, if recorded.
    pub created_time: Option<DateTime<Utc>>,
    /// Commit time of the latest version.
    pub last_modified: DateTime<Utc>,
    /// Latest version.
    pub version: u64,
    /// Live files.
    pub num_files: u64,
    /// Bytes of the live files.
    pub size_in_bytes: u64,
    /// Partition columns.
    pub partition_columns: Vec<String>,
    /// Table properties.
    pub properties: BTreeMap<String, String>,
    /// Protocol reader version.
    pub min_reader_version: i32,
    /// Protocol writer version.
    pub min_writer_version: i32,
    /// Data file format provider.
    pub format: String,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl LakeTable {
    /// Describe the table at its latest version.
    pub async fn detail(&self) -> Result<TableDetail, TableError> {
        let snapshot = self.snapshot().await?;
        let metadata = &snapshot.metadata;
        Ok(TableDetail {
            id: metadata.id.clone(),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            location: self.location.to_string(),
            created_time: metadata.created_time.map(from_millis),
            last_modified: from_millis(snapshot.timestamp),
            version: snapshot.version,
            num_files: snapshot.num_files() as u64,
            size_in_bytes: snapshot.size_bytes(),
            partition_columns: metadata.partition_columns.clone(),
            properties: metadata.configuration.clone(),
            min_reader_version: snapshot.protocol.min_reader_version,
            min_writer_version: snapshot.protocol.min_writer_version,
            format: metadata.format.provider.clone(),
        })
    }
}
