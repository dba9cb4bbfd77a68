//! CREATE TABLE.
//!
//! Version 0 carries the protocol, the initial metadata and the add actions
//! for any initial data. Creating the version file is the same atomic
//! create-if-absent step every commit uses, so two concurrent creates yield
//! exactly one table.
use std::collections::BTreeMap;

use arrow::record_batch::RecordBatch;
use chrono::Utc;
use log::info;
use snafu::prelude::*;
use uuid::Uuid;

use crate::table::{
    LakeTable,
    error::{
        AlreadyExistsSnafu, InvalidPropertySnafu, SchemaMismatchSnafu, SchemaSnafu, TableError,
    },
    transaction::{CommitResult, Operation},
};
use crate::transaction_log::{
    Action, ActionSummary, CommitError, CommitInfo, Format, Metadata, Protocol, Snapshot,
    TableConfig, TableSchema,
};

/// Optional settings for [`LakeTable::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Table name.
    pub name: Option<String>,
    /// Table description.
    pub description: Option<String>,
    /// Partition columns, in directory order.
    pub partition_columns: Vec<String>,
    /// Table properties (`delta.*` keys are validated).
    pub configuration: BTreeMap<String, String>,
    /// Free-form metadata for the CREATE commit.
    pub user_metadata: Option<String>,
}

impl CreateOptions {
    /// Partition the table by `columns`.
    pub fn with_partition_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set one table property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Set the table name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl LakeTable {
    /// Create the table at this handle's location as version 0, writing
    /// `batches` as its initial data.
    ///
    /// Fails with [`TableError::AlreadyExists`] when the log already has
    /// versions.
    pub async fn create(
        &self,
        schema: TableSchema,
        options: CreateOptions,
        batches: Vec<RecordBatch>,
    ) -> Result<CommitResult, TableError> {
        if let Some(current_version) = self.store.latest_version().await? {
            return AlreadyExistsSnafu {
                location: self.location.to_string(),
                current_version,
            }
            .fail();
        }

        TableConfig::validate(&options.configuration).context(InvalidPropertySnafu)?;
        for c in &options.partition_columns {
            ensure!(
                schema.field(c).is_some(),
                SchemaMismatchSnafu {
                    msg: format!("partition column {c} is not in the schema"),
                }
            );
        }

        let now = Utc::now().timestamp_millis();
        let metadata = Metadata {
            id: Uuid::new_v4().to_string(),
            name: options.name,
            description: options.description,
            format: Format::default(),
            schema_string: schema.to_json().context(SchemaSnafu)?,
            partition_columns: options.partition_columns.clone(),
            configuration: options.configuration.clone(),
            created_time: Some(now),
        };

        let mut actions = vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(metadata.clone()),
        ];
        let adds = self
            .write_data_files(&schema, &options.partition_columns, &batches, true)
            .await?;
        actions.extend(adds.into_iter().map(Action::Add));

        let operation = Operation::CreateTable {
            partition_by: options.partition_columns,
            properties: options.configuration,
        };
        let metrics = ActionSummary::from_actions(&actions).to_metrics();
        actions.push(Action::CommitInfo(CommitInfo {
            timestamp: now,
            operation: operation.name().to_string(),
            operation_parameters: operation.parameters(),
            operation_metrics: metrics.clone(),
            user_metadata: options.user_metadata,
            read_version: None,
            is_blind_append: Some(true),
            engine_info: self.config.engine_info.clone(),
        }));

        match self.store.append(0, &actions).await {
            Ok(()) => {}
            Err(CommitError::VersionAlreadyExists { .. }) => {
                return AlreadyExistsSnafu {
                    location: self.location.to_string(),
                    current_version: 0u64,
                }
                .fail();
            }
            Err(e) => return Err(e.into()),
        }
        info!("created table {} ({})", self.location, metadata.id);

        let mut snapshot = Snapshot {
            version: 0,
            timestamp: now,
            files: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            metadata,
            protocol: Protocol::default(),
        };
        snapshot.apply_version(0, &actions);
        self.after_commit(&snapshot).await;

        Ok(CommitResult {
            version: 0,
            attempts: 1,
            metrics,
        })
    }
}
