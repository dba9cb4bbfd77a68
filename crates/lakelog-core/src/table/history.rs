//! DESCRIBE HISTORY: the commit info of every available version.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::table::{LakeTable, error::TableError};
use crate::transaction_log::{Action, ActionSummary};

/// One row of the table history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Committed version.
    pub version: u64,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Operation name.
    pub operation: String,
    /// Operation parameters.
    pub operation_parameters: BTreeMap<String, String>,
    /// File and row metrics. Recomputed from the version's actions when the
    /// writer recorded none.
    pub operation_metrics: BTreeMap<String, String>,
    /// User metadata attached to the commit.
    pub user_metadata: Option<String>,
    /// Version the writer read.
    pub read_version: Option<u64>,
    /// Whether the commit was a blind append.
    pub is_blind_append: Option<bool>,
    /// Engine that wrote the commit.
    pub engine_info: Option<String>,
}

impl LakeTable {
    /// History newest-first, at most `limit` entries.
    ///
    /// Versions pruned by log retention are no longer listed; versions
    /// without a commit info action are skipped.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<CommitRecord>, TableError> {
        let versions = self.store.list_versions().await?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        for version in versions.into_iter().rev() {
            if out.len() >= limit {
                break;
            }
            let actions = self.store.read(version).await?;
            let Some(info) = actions.iter().find_map(|a| match a {
                Action::CommitInfo(ci) => Some(ci.clone()),
                _ => None,
            }) else {
                continue;
            };

            let operation_metrics = if info.operation_metrics.is_empty() {
                ActionSummary::from_actions(&actions).to_metrics()
            } else {
                info.operation_metrics
            };
            out.push(CommitRecord {
                version,
                timestamp: DateTime::<Utc>::from_timestamp_millis(info.timestamp)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                operation: info.operation,
                operation_parameters: info.operation_parameters,
                operation_metrics,
                user_metadata: info.user_metadata,
                read_version: info.read_version,
                is_blind_append: info.is_blind_append,
                engine_info: info.engine_info,
            });
        }
        Ok(out)
    }
}
