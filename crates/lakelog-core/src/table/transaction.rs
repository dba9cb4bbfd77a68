//! Optimistic-concurrency commits.
//!
//! A writer plans its actions against a pinned base snapshot and tries to
//! create `base + 1`. Creating the version file is the only serialization
//! point; when another writer wins that version the loser reads every
//! winning version and checks for overlap:
//!
//! - a file the loser removes was removed by a winner, or
//! - a winner changed the table metadata or protocol.
//!
//! Overlap aborts with [`TableError::ConcurrentModification`]. Otherwise the
//! same actions are retried at `latest + 1`, up to
//! [`EngineConfig::max_commit_attempts`](crate::config::EngineConfig)
//! attempts.
//!
//! After a version lands the digest is written and, on the checkpoint
//! cadence, a checkpoint followed by log-retention cleanup. These steps are
//! best-effort: the commit has already happened and their failures are only
//! logged.
use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::{debug, info, warn};

use crate::table::{
    LakeTable,
    error::{ConcurrentModificationSnafu, TableError},
};
use crate::transaction_log::{Action, ActionSummary, CommitError, CommitInfo, Snapshot};

/// Kind and parameters of a committed operation, as shown by history.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// CREATE TABLE.
    CreateTable {
        /// Partition columns of the new table.
        partition_by: Vec<String>,
        /// Initial table properties.
        properties: BTreeMap<String, String>,
    },
    /// INSERT (append).
    Write,
    /// DELETE.
    Delete {
        /// Description of the row predicate.
        predicate: String,
    },
    /// UPDATE.
    Update {
        /// Description of the row predicate.
        predicate: String,
    },
    /// MERGE.
    Merge {
        /// Join condition.
        predicate: String,
        /// Action applied to matched target rows, if any.
        matched: Option<String>,
        /// Whether unmatched source rows are inserted.
        not_matched_insert: bool,
    },
    /// OPTIMIZE (compaction).
    Optimize {
        /// Target output file size in bytes.
        target_size: u64,
    },
    /// RESTORE.
    Restore {
        /// Version the table was restored to.
        version: u64,
        /// Timestamp the caller asked for, when restoring by time.
        timestamp: Option<String>,
    },
    /// ALTER TABLE SET TBLPROPERTIES.
    SetTableProperties {
        /// Properties set.
        properties: BTreeMap<String, String>,
    },
    /// ALTER TABLE UNSET TBLPROPERTIES.
    UnsetTableProperties {
        /// Keys removed.
        keys: Vec<String>,
    },
}

impl Operation {
    /// Operation name recorded in `CommitInfo.operation`.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "CREATE TABLE",
            Operation::Write => "WRITE",
            Operation::Delete { .. } => "DELETE",
            Operation::Update { .. } => "UPDATE",
            Operation::Merge { .. } => "MERGE",
            Operation::Optimize { .. } => "OPTIMIZE",
            Operation::Restore { .. } => "RESTORE",
            Operation::SetTableProperties { .. } => "SET TBLPROPERTIES",
            Operation::UnsetTableProperties { .. } => "UNSET TBLPROPERTIES",
        }
    }

    /// Parameters recorded in `CommitInfo.operation_parameters`.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        match self {
            Operation::CreateTable {
                partition_by,
                properties,
            } => {
                p.insert("partitionBy".into(), json_string(partition_by.clone()));
                p.insert("properties".into(), json_string(string_map(properties)));
            }
            Operation::Write => {
                p.insert("mode".into(), "Append".into());
            }
            Operation::Delete { predicate } | Operation::Update { predicate } => {
                p.insert("predicate".into(), predicate.clone());
            }
            Operation::Merge {
                predicate,
                matched,
                not_matched_insert,
            } => {
                p.insert("predicate".into(), predicate.clone());
                if let Some(m) = matched {
                    p.insert("matchedPredicates".into(), format!("[{{\"actionType\":\"{m}\"}}]"));
                }
                if *not_matched_insert {
                    p.insert(
                        "notMatchedPredicates".into(),
                        "[{\"actionType\":\"insert\"}]".into(),
                    );
                }
            }
            Operation::Optimize { target_size } => {
                p.insert("targetSize".into(), target_size.to_string());
            }
            Operation::Restore { version, timestamp } => {
                p.insert("version".into(), version.to_string());
                if let Some(ts) = timestamp {
                    p.insert("timestamp".into(), ts.clone());
                }
            }
            Operation::SetTableProperties { properties } => {
                p.insert("properties".into(), json_string(string_map(properties)));
            }
            Operation::UnsetTableProperties { keys } => {
                p.insert("properties".into(), json_string(keys.clone()));
            }
        }
        p
    }
}

fn string_map(map: &BTreeMap<String, String>) -> serde_json::Map<String, serde_json::Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
        .collect()
}

fn json_string<V: Into<serde_json::Value>>(value: V) -> String {
    value.into().to_string()
}

/// Extra commit information supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Free-form metadata stored in `CommitInfo.user_metadata`.
    pub user_metadata: Option<String>,
    /// Operation-specific metrics merged into `CommitInfo.operation_metrics`.
    pub extra_metrics: BTreeMap<String, String>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// Version created by the commit.
    pub version: u64,
    /// Attempts needed (1 when no other writer interfered).
    pub attempts: u32,
    /// Metrics recorded in the commit info.
    pub metrics: BTreeMap<String, String>,
}

/// Why a set of winning actions conflicts with ours, if it does.
fn find_conflict(removed_by_us: &HashSet<&str>, winner: &[Action]) -> Option<String> {
    for action in winner {
        match action {
            Action::Remove(r) if removed_by_us.contains(r.path.as_str()) => {
                return Some(format!("file {} was removed concurrently", r.path));
            }
            Action::Metadata(_) => return Some("table metadata changed concurrently".into()),
            Action::Protocol(_) => return Some("table protocol changed concurrently".into()),
            _ => {}
        }
    }
    None
}

impl LakeTable {
    /// Commit `actions` planned against `base` as a new version.
    pub async fn commit(
        &self,
        base: &Snapshot,
        actions: Vec<Action>,
        operation: Operation,
    ) -> Result<CommitResult, TableError> {
        self.commit_with_options(base, actions, operation, CommitOptions::default())
            .await
    }

    /// Commit with caller-supplied commit info.
    pub async fn commit_with_options(
        &self,
        base: &Snapshot,
        actions: Vec<Action>,
        operation: Operation,
        options: CommitOptions,
    ) -> Result<CommitResult, TableError> {
        let summary = ActionSummary::from_actions(&actions);
        let mut metrics = summary.to_metrics();
        metrics.extend(options.extra_metrics);

        let removed_by_us: HashSet<&str> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Remove(r) => Some(r.path.as_str()),
                _ => None,
            })
            .collect();
        let is_blind_append = matches!(operation, Operation::Write) && removed_by_us.is_empty();

        let mut current = base.clone();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let version = current.version + 1;

            // Commit timestamps strictly increase so timestamp lookups can
            // binary-search the log.
            let timestamp = Utc::now().timestamp_millis().max(current.timestamp + 1);
            let mut full = actions.clone();
            full.push(Action::CommitInfo(CommitInfo {
                timestamp,
                operation: operation.name().to_string(),
                operation_parameters: operation.parameters(),
                operation_metrics: metrics.clone(),
                user_metadata: options.user_metadata.clone(),
                read_version: Some(base.version),
                is_blind_append: Some(is_blind_append),
                engine_info: self.config.engine_info.clone(),
            }));

            match self.store.append(version, &full).await {
                Ok(()) => {
                    info!(
                        "{} committed version {version} at {} (attempt {attempts})",
                        operation.name(),
                        self.location
                    );
                    current.apply_version(version, &full);
                    self.after_commit(&current).await;
                    return Ok(CommitResult {
                        version,
                        attempts,
                        metrics,
                    });
                }
                Err(CommitError::VersionAlreadyExists { .. }) => {
                    debug!(
                        "{} lost version {version}; checking winners for conflicts",
                        operation.name()
                    );
                }
                Err(e) => return Err(self.map_log_error(e)),
            }

            // Catch up with every version that landed since `current`. Log
            // retention may already have pruned the first of them, in which
            // case the winners can no longer be checked.
            let versions = self.store.list_versions().await?;
            let earliest = versions.first().copied().unwrap_or(version);
            let latest = versions.last().copied().unwrap_or(version);
            if earliest > version {
                warn!(
                    "{} based on version {} aborted: versions before {earliest} were pruned",
                    operation.name(),
                    base.version
                );
                return ConcurrentModificationSnafu {
                    operation: operation.name(),
                    base_version: base.version,
                    conflicting_version: earliest,
                    reason: format!("base version {} was pruned by log retention", current.version),
                }
                .fail();
            }
            for v in (current.version + 1)..=latest {
                let winner = self.store.read(v).await?;
                if let Some(reason) = find_conflict(&removed_by_us, &winner) {
                    warn!(
                        "{} based on version {} aborted: {reason} (version {v})",
                        operation.name(),
                        base.version
                    );
                    return ConcurrentModificationSnafu {
                        operation: operation.name(),
                        base_version: base.version,
                        conflicting_version: v,
                        reason,
                    }
                    .fail();
                }
                current.apply_version(v, &winner);
            }

            // Our removes must still be live on top of the winners.
            if let Some(path) = removed_by_us
                .iter()
                .find(|p| !current.files.contains_key(**p))
            {
                return ConcurrentModificationSnafu {
                    operation: operation.name(),
                    base_version: base.version,
                    conflicting_version: current.version,
                    reason: format!("file {path} is no longer live"),
                }
                .fail();
            }

            if attempts >= self.config.max_commit_attempts {
                warn!(
                    "{} based on version {} gave up after {attempts} attempts",
                    operation.name(),
                    base.version
                );
                return ConcurrentModificationSnafu {
                    operation: operation.name(),
                    base_version: base.version,
                    conflicting_version: current.version,
                    reason: format!("retry limit of {attempts} attempts exhausted"),
                }
                .fail();
            }
            debug!(
                "{} rebasing onto version {} (attempt {attempts})",
                operation.name(),
                current.version
            );
        }
    }

    /// Post-commit maintenance for the snapshot at the new version.
    pub(crate) async fn after_commit(&self, snapshot: &Snapshot) {
        if let Err(e) = self
            .store
            .write_digest(snapshot.version, &snapshot.digest())
            .await
        {
            warn!("failed to write digest for version {}: {e}", snapshot.version);
        }

        let interval = snapshot
            .table_config()
            .checkpoint_interval
            .unwrap_or(self.config.checkpoint_interval);
        if interval == 0 || snapshot.version == 0 || snapshot.version % interval != 0 {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.write_checkpoint_for(snapshot, now).await {
            warn!("failed to checkpoint version {}: {e}", snapshot.version);
            return;
        }
        match self.cleanup_expired_logs_for(snapshot, now).await {
            Ok(0) => {}
            Ok(n) => info!("pruned {n} expired log versions at {}", self.location),
            Err(e) => warn!("log cleanup after checkpoint {} failed: {e}", snapshot.version),
        }
    }
}
