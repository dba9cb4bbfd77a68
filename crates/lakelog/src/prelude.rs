//! Wrapper prelude.
//!
//! The `lakelog` crate is the supported public entry point. Downstream code
//! should prefer importing from this prelude instead of depending on
//! `lakelog-core` module paths.

pub use crate::transaction_log;
pub use crate::{
    CancelSignal, CreateOptions, EngineConfig, FieldType, LakeTable, MatchedAction, MergeOptions,
    OptimizeOptions, Predicate, RowUpdate, SchemaField, Snapshot, TableError, TableLocation,
    TableSchema, VacuumOptions,
};
