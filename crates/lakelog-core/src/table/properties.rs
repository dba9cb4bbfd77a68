//! ALTER TABLE SET / UNSET TBLPROPERTIES.
//!
//! Properties live in `Metadata.configuration`, so changing them commits a
//! new metadata action. Concurrent writers see the change as a metadata
//! conflict and abort rather than commit against stale settings.
use std::collections::BTreeMap;

use snafu::prelude::*;

use crate::table::{
    LakeTable,
    error::{InvalidPropertySnafu, TableError},
    transaction::{CommitResult, Operation},
};
use crate::transaction_log::{Action, TableConfig};

impl LakeTable {
    /// Set (or overwrite) table properties.
    ///
    /// Known `delta.*` properties are validated first; an invalid value
    /// fails with [`TableError::InvalidProperty`] and nothing is committed.
    pub async fn set_properties(
        &self,
        properties: BTreeMap<String, String>,
    ) -> Result<CommitResult, TableError> {
        TableConfig::validate(&properties).context(InvalidPropertySnafu)?;

        let base = self.snapshot().await?;
        let mut metadata = base.metadata.clone();
        metadata
            .configuration
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.commit(
            &base,
            vec![Action::Metadata(metadata)],
            Operation::SetTableProperties { properties },
        )
        .await
    }

    /// Remove table properties. Keys that are not set are ignored.
    pub async fn unset_properties(&self, keys: Vec<String>) -> Result<CommitResult, TableError> {
        let base = self.snapshot().await?;
        let mut metadata = base.metadata.clone();
        for key in &keys {
            metadata.configuration.remove(key);
        }

        self.commit(
            &base,
            vec![Action::Metadata(metadata)],
            Operation::UnsetTableProperties { keys },
        )
        .await
    }
}
