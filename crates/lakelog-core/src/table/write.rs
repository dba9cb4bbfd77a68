//! INSERT, DELETE, UPDATE and MERGE.
//!
//! Data files are immutable, so every row-level change is expressed at file
//! granularity: a file with at least one affected row is removed and its
//! surviving (or rewritten) rows are written to new files. Files without
//! affected rows are left alone, which keeps concurrent writers that touch
//! disjoint files free of conflicts.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, BooleanArray, Scalar, UInt32Array},
    compute::{
        concat_batches, filter_record_batch,
        kernels::{boolean as boolean_kernels, cmp as cmp_kernels},
        prep_null_mask_filter, take_record_batch,
    },
    error::ArrowError,
    record_batch::RecordBatch,
    util::display::array_value_to_string,
};
use chrono::Utc;
use log::debug;
use snafu::prelude::*;

use crate::table::{
    LakeTable,
    error::{
        ArrowSnafu, DataFileSnafu, DuplicateMergeKeySnafu, SchemaMismatchSnafu, SchemaSnafu,
        TableError,
    },
    partition::{PartitionValues, partition_dir, split_by_partition, validate_batch},
    transaction::{CommitOptions, CommitResult, Operation},
};
use crate::transaction_log::{Action, AddFile, Snapshot, TableSchema};

type PredicateFn = dyn Fn(&RecordBatch) -> Result<BooleanArray, ArrowError> + Send + Sync;
type UpdateFn = dyn Fn(&RecordBatch) -> Result<RecordBatch, ArrowError> + Send + Sync;

/// Row predicate for DELETE and UPDATE.
///
/// A null result counts as "no match".
#[derive(Clone)]
pub struct Predicate {
    description: String,
    eval: Arc<PredicateFn>,
}

impl Predicate {
    /// Predicate evaluated by `eval`, recorded in history as `description`.
    pub fn new<F>(description: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&RecordBatch) -> Result<BooleanArray, ArrowError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            eval: Arc::new(eval),
        }
    }

    /// `column = value`, where `value` is a one-element array of the
    /// column's type.
    pub fn eq(column: impl Into<String>, value: ArrayRef) -> Self {
        let column = column.into();
        let shown = array_value_to_string(value.as_ref(), 0).unwrap_or_default();
        let description = format!("{column} = {shown}");
        Self::new(description, move |batch| {
            let array = batch.column_by_name(&column).ok_or_else(|| {
                ArrowError::SchemaError(format!("column {column} not found"))
            })?;
            cmp_kernels::eq(array, &Scalar::new(Arc::clone(&value)))
        })
    }

    /// Predicate matching every row.
    pub fn all() -> Self {
        Self::new("true", |batch| {
            Ok(BooleanArray::from(vec![true; batch.num_rows()]))
        })
    }

    /// Human-readable form recorded in the commit.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate against `batch`, with nulls mapped to false.
    fn matches(&self, batch: &RecordBatch) -> Result<BooleanArray, TableError> {
        let mask = (self.eval)(batch).context(ArrowSnafu)?;
        ensure!(
            mask.len() == batch.num_rows(),
            SchemaMismatchSnafu {
                msg: format!(
                    "predicate {} returned {} values for {} rows",
                    self.description,
                    mask.len(),
                    batch.num_rows()
                ),
            }
        );
        Ok(if mask.null_count() > 0 {
            prep_null_mask_filter(&mask)
        } else {
            mask
        })
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

/// Rewrites the rows matched by an UPDATE predicate.
///
/// The function receives only matched rows and must return a batch of the
/// same length with the table schema.
#[derive(Clone)]
pub struct RowUpdate {
    description: String,
    apply: Arc<UpdateFn>,
}

impl RowUpdate {
    /// Update applied by `apply`, recorded in history as `description`.
    pub fn new<F>(description: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&RecordBatch) -> Result<RecordBatch, ArrowError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            apply: Arc::new(apply),
        }
    }

    /// Replace `column` with a constant taken from the one-element `value`.
    pub fn set(column: impl Into<String>, value: ArrayRef) -> Self {
        let column = column.into();
        let shown = array_value_to_string(value.as_ref(), 0).unwrap_or_default();
        let description = format!("{column} = {shown}");
        Self::new(description, move |batch| {
            let idx = batch.schema().index_of(&column)?;
            let indices = UInt32Array::from(vec![0u32; batch.num_rows()]);
            let filled = arrow::compute::take(value.as_ref(), &indices, None)?;
            let mut columns = batch.columns().to_vec();
            columns[idx] = filled;
            RecordBatch::try_new(batch.schema(), columns)
        })
    }

    /// Human-readable form recorded in the commit.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for RowUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RowUpdate").field(&self.description).finish()
    }
}

/// What MERGE does with target rows that have a matching source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedAction {
    /// Replace the target row with the source row.
    UpdateAll,
    /// Delete the target row.
    Delete,
}

impl MatchedAction {
    fn name(self) -> &'static str {
        match self {
            MatchedAction::UpdateAll => "update",
            MatchedAction::Delete => "delete",
        }
    }
}

/// Settings for [`LakeTable::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Join column present in both source and target.
    pub on: String,
    /// Action for matched target rows; `None` leaves them untouched.
    pub when_matched: Option<MatchedAction>,
    /// Insert source rows that match no target row.
    pub insert_not_matched: bool,
}

impl MergeOptions {
    /// Upsert on `on`: update matches, insert the rest.
    pub fn upsert(on: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            when_matched: Some(MatchedAction::UpdateAll),
            insert_not_matched: true,
        }
    }
}

/// Outcome of a MERGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// The commit.
    pub commit: CommitResult,
    /// Source rows read.
    pub num_source_rows: u64,
    /// Target rows replaced by source rows.
    pub num_target_rows_updated: u64,
    /// Target rows deleted.
    pub num_target_rows_deleted: u64,
    /// Source rows inserted.
    pub num_target_rows_inserted: u64,
    /// Unaffected target rows rewritten alongside affected ones.
    pub num_target_rows_copied: u64,
}

/// Per-file outcome of evaluating a predicate.
struct Rewrite {
    affected: u64,
    copied: u64,
    output: Vec<RecordBatch>,
}

impl LakeTable {
    /// Write `batches` as new data files, one per partition, returning their
    /// add actions.
    pub(crate) async fn write_data_files(
        &self,
        schema: &TableSchema,
        partition_columns: &[String],
        batches: &[RecordBatch],
        data_change: bool,
    ) -> Result<Vec<AddFile>, TableError> {
        let mut groups: BTreeMap<Vec<Option<String>>, (PartitionValues, Vec<RecordBatch>)> =
            BTreeMap::new();
        for batch in batches.iter().filter(|b| b.num_rows() > 0) {
            validate_batch(schema, batch)?;
            for (values, part) in split_by_partition(batch, partition_columns)? {
                let key = values.values().cloned().collect();
                groups
                    .entry(key)
                    .or_insert_with(|| (values, Vec::new()))
                    .1
                    .push(part);
            }
        }

        let arrow_schema = schema.to_arrow_schema_ref();
        let mut adds = Vec::with_capacity(groups.len());
        for (_, (values, parts)) in groups {
            let dir = partition_dir(partition_columns, &values);
            let written = self
                .codec
                .write(&self.location, &dir, Arc::clone(&arrow_schema), &parts)
                .await
                .context(DataFileSnafu)?;
            adds.push(written.into_add(values, data_change));
        }
        Ok(adds)
    }

    /// INSERT `batches` into the table.
    pub async fn insert(&self, batches: Vec<RecordBatch>) -> Result<CommitResult, TableError> {
        self.insert_with_options(batches, CommitOptions::default())
            .await
    }

    /// INSERT with caller-supplied commit info.
    pub async fn insert_with_options(
        &self,
        batches: Vec<RecordBatch>,
        options: CommitOptions,
    ) -> Result<CommitResult, TableError> {
        let base = self.snapshot().await?;
        let schema = base.schema().context(SchemaSnafu)?;
        let adds = self
            .write_data_files(&schema, &base.metadata.partition_columns, &batches, true)
            .await?;
        let actions = adds.into_iter().map(Action::Add).collect();
        self.commit_with_options(&base, actions, Operation::Write, options)
            .await
    }

    /// DELETE the rows matching `predicate`.
    pub async fn delete_where(&self, predicate: &Predicate) -> Result<CommitResult, TableError> {
        let base = self.snapshot().await?;
        let (actions, deleted, copied) = self
            .rewrite_files(&base, |batch| {
                let mask = predicate.matches(batch)?;
                let keep = boolean_kernels::not(&mask).context(ArrowSnafu)?;
                let kept = filter_record_batch(batch, &keep).context(ArrowSnafu)?;
                Ok(Rewrite {
                    affected: mask.true_count() as u64,
                    copied: kept.num_rows() as u64,
                    output: vec![kept],
                })
            })
            .await?;

        let options = CommitOptions {
            extra_metrics: BTreeMap::from([
                ("numDeletedRows".to_string(), deleted.to_string()),
                ("numCopiedRows".to_string(), copied.to_string()),
            ]),
            ..CommitOptions::default()
        };
        let operation = Operation::Delete {
            predicate: predicate.description().to_string(),
        };
        self.commit_with_options(&base, actions, operation, options)
            .await
    }

    /// UPDATE the rows matching `predicate` with `update`.
    pub async fn update_where(
        &self,
        predicate: &Predicate,
        update: &RowUpdate,
    ) -> Result<CommitResult, TableError> {
        let base = self.snapshot().await?;
        let (actions, updated, copied) = self
            .rewrite_files(&base, |batch| {
                let mask = predicate.matches(batch)?;
                let keep = boolean_kernels::not(&mask).context(ArrowSnafu)?;
                let kept = filter_record_batch(batch, &keep).context(ArrowSnafu)?;
                let matched = filter_record_batch(batch, &mask).context(ArrowSnafu)?;
                let rewritten = (update.apply)(&matched).context(ArrowSnafu)?;
                ensure!(
                    rewritten.num_rows() == matched.num_rows(),
                    SchemaMismatchSnafu {
                        msg: format!(
                            "update {} returned {} rows for {} matched rows",
                            update.description,
                            rewritten.num_rows(),
                            matched.num_rows()
                        ),
                    }
                );
                Ok(Rewrite {
                    affected: matched.num_rows() as u64,
                    copied: kept.num_rows() as u64,
                    output: vec![kept, rewritten],
                })
            })
            .await?;

        let options = CommitOptions {
            extra_metrics: BTreeMap::from([
                ("numUpdatedRows".to_string(), updated.to_string()),
                ("numCopiedRows".to_string(), copied.to_string()),
            ]),
            ..CommitOptions::default()
        };
        let operation = Operation::Update {
            predicate: predicate.description().to_string(),
        };
        self.commit_with_options(&base, actions, operation, options)
            .await
    }

    /// Apply `rewrite` to every live file of `base`. Files with affected
    /// rows are removed and their output rows written to new files.
    ///
    /// Returns the actions plus the affected and copied row counts.
    async fn rewrite_files<F>(
        &self,
        base: &Snapshot,
        rewrite: F,
    ) -> Result<(Vec<Action>, u64, u64), TableError>
    where
        F: Fn(&RecordBatch) -> Result<Rewrite, TableError>,
    {
        let schema = base.schema().context(SchemaSnafu)?;
        let partition_columns = &base.metadata.partition_columns;
        let now = Utc::now().timestamp_millis();

        let mut actions = Vec::new();
        let (mut affected, mut copied) = (0u64, 0u64);
        for (path, add) in &base.files {
            let batches = self
                .codec
                .read(&self.location, path)
                .await
                .context(DataFileSnafu)?;

            let mut file_affected = 0u64;
            let mut file_copied = 0u64;
            let mut output = Vec::new();
            for batch in &batches {
                let r = rewrite(batch)?;
                file_affected += r.affected;
                file_copied += r.copied;
                output.extend(r.output);
            }
            if file_affected == 0 {
                continue;
            }
            debug!("rewriting {path}: {file_affected} rows affected, {file_copied} copied");

            affected += file_affected;
            copied += file_copied;
            actions.push(Action::Remove(add.to_remove(now, true)));
            let adds = self
                .write_data_files(&schema, partition_columns, &output, true)
                .await?;
            actions.extend(adds.into_iter().map(Action::Add));
        }
        Ok((actions, affected, copied))
    }

    /// MERGE `source` into the table on `options.on`.
    ///
    /// Fails with [`TableError::DuplicateMergeKey`] when two source rows
    /// share a key; source rows with a null key never match.
    pub async fn merge(
        &self,
        source: Vec<RecordBatch>,
        options: MergeOptions,
    ) -> Result<MergeResult, TableError> {
        let base = self.snapshot().await?;
        let schema = base.schema().context(SchemaSnafu)?;
        for batch in &source {
            validate_batch(&schema, batch)?;
        }
        let source_keys = merge_keys(&source, &options.on)?;

        let now = Utc::now().timestamp_millis();
        let mut actions = Vec::new();
        let mut matched_source: HashSet<(usize, u32)> = HashSet::new();
        let (mut updated, mut deleted, mut copied) = (0u64, 0u64, 0u64);

        for (path, add) in &base.files {
            let batches = self
                .codec
                .read(&self.location, path)
                .await
                .context(DataFileSnafu)?;

            let mut kept = Vec::new();
            let mut replacements: Vec<(usize, u32)> = Vec::new();
            let mut file_matched = 0u64;
            for batch in &batches {
                let keys = batch.column_by_name(&options.on).context(SchemaMismatchSnafu {
                    msg: format!("merge column {} missing from target", options.on),
                })?;
                let mut keep = Vec::with_capacity(batch.num_rows());
                for row in 0..batch.num_rows() {
                    let hit = if keys.is_null(row) {
                        None
                    } else {
                        let key = array_value_to_string(keys.as_ref(), row).context(ArrowSnafu)?;
                        source_keys.get(&key).copied()
                    };
                    match hit {
                        Some(src) => {
                            matched_source.insert(src);
                            replacements.push(src);
                            file_matched += 1;
                            keep.push(options.when_matched.is_none());
                        }
                        None => keep.push(true),
                    }
                }
                let keep = BooleanArray::from(keep);
                kept.push(filter_record_batch(batch, &keep).context(ArrowSnafu)?);
            }

            let Some(action) = options.when_matched else {
                continue;
            };
            if file_matched == 0 {
                continue;
            }

            let mut output = kept;
            copied += output.iter().map(|b| b.num_rows() as u64).sum::<u64>();
            match action {
                MatchedAction::Delete => deleted += file_matched,
                MatchedAction::UpdateAll => {
                    updated += file_matched;
                    output.push(take_source_rows(&source, &replacements)?);
                }
            }
            actions.push(Action::Remove(add.to_remove(now, true)));
            let adds = self
                .write_data_files(&schema, &base.metadata.partition_columns, &output, true)
                .await?;
            actions.extend(adds.into_iter().map(Action::Add));
        }

        let num_source_rows: u64 = source.iter().map(|b| b.num_rows() as u64).sum();
        let mut inserted = 0u64;
        if options.insert_not_matched {
            let rows: Vec<(usize, u32)> = source
                .iter()
                .enumerate()
                .flat_map(|(b, batch)| (0..batch.num_rows() as u32).map(move |r| (b, r)))
                .filter(|src| !matched_source.contains(src))
                .collect();
            if !rows.is_empty() {
                inserted = rows.len() as u64;
                let batch = take_source_rows(&source, &rows)?;
                let adds = self
                    .write_data_files(&schema, &base.metadata.partition_columns, &[batch], true)
                    .await?;
                actions.extend(adds.into_iter().map(Action::Add));
            }
        }

        let commit_options = CommitOptions {
            extra_metrics: BTreeMap::from([
                ("numSourceRows".to_string(), num_source_rows.to_string()),
                ("numTargetRowsUpdated".to_string(), updated.to_string()),
                ("numTargetRowsDeleted".to_string(), deleted.to_string()),
                ("numTargetRowsInserted".to_string(), inserted.to_string()),
                ("numTargetRowsCopied".to_string(), copied.to_string()),
            ]),
            ..CommitOptions::default()
        };
        let operation = Operation::Merge {
            predicate: format!("target.{0} = source.{0}", options.on),
            matched: options.when_matched.map(|a| a.name().to_string()),
            not_matched_insert: options.insert_not_matched,
        };
        let commit = self
            .commit_with_options(&base, actions, operation, commit_options)
            .await?;

        Ok(MergeResult {
            commit,
            num_source_rows,
            num_target_rows_updated: updated,
            num_target_rows_deleted: deleted,
            num_target_rows_inserted: inserted,
            num_target_rows_copied: copied,
        })
    }
}

/// Map each non-null source key to its (batch, row) position.
fn merge_keys(
    source: &[RecordBatch],
    column: &str,
) -> Result<HashMap<String, (usize, u32)>, TableError> {
    let mut keys = HashMap::new();
    for (b, batch) in source.iter().enumerate() {
        let array = batch.column_by_name(column).context(SchemaMismatchSnafu {
            msg: format!("merge column {column} missing from source"),
        })?;
        for row in 0..batch.num_rows() {
            if array.is_null(row) {
                continue;
            }
            let key = array_value_to_string(array.as_ref(), row).context(ArrowSnafu)?;
            ensure!(
                !keys.contains_key(&key),
                DuplicateMergeKeySnafu { column, key }
            );
            keys.insert(key, (b, row as u32));
        }
    }
    Ok(keys)
}

/// Gather the given source rows, in order, into one batch.
fn take_source_rows(
    source: &[RecordBatch],
    rows: &[(usize, u32)],
) -> Result<RecordBatch, TableError> {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < rows.len() {
        let b = rows[i].0;
        let mut indices = Vec::new();
        while i < rows.len() && rows[i].0 == b {
            indices.push(rows[i].1);
            i += 1;
        }
        let indices = UInt32Array::from(indices);
        parts.push(take_record_batch(&source[b], &indices).context(ArrowSnafu)?);
    }
    let schema = source
        .first()
        .map(RecordBatch::schema)
        .context(SchemaMismatchSnafu {
            msg: "merge source is empty".to_string(),
        })?;
    concat_batches(&schema, &parts).context(ArrowSnafu)
}
