//! # lakelog
//!
//! Transactional table format over Parquet data files and a JSON commit log.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lakelog::prelude::*;
//!
//! let table = LakeTable::new(TableLocation::local("/data/events"));
//! table.create(schema, CreateOptions::default(), vec![batch]).await?;
//! table.delete_where(&Predicate::eq("id", ids)).await?;
//! let v0 = table.snapshot_at_version(0).await?;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Transaction log namespace (wrapper-only).
pub mod transaction_log {
    pub use lakelog_core::transaction_log::{
        Action, AddFile, CommitInfo, Metadata, Protocol, RemoveFile, TransactionLogStore,
        VersionDigest,
    };
}

pub use lakelog_core::cancel::CancelSignal;
pub use lakelog_core::config::EngineConfig;
pub use lakelog_core::formats::{DataFileCodec, ParquetDataFiles};
pub use lakelog_core::storage::{RetryPolicy, TableLocation};
pub use lakelog_core::table::{
    CommitOptions, CommitRecord, CommitResult, CreateOptions, LakeTable, MatchedAction,
    MergeOptions, MergeResult, Operation, OptimizeMetrics, OptimizeOptions, Predicate, RowUpdate,
    TableDetail, TableError, VacuumMetrics, VacuumOptions,
};
pub use lakelog_core::transaction_log::{
    FieldType, SchemaField, Snapshot, TableConfig, TableSchema,
};
