//! Core engine for a log-structured transactional table format.
//!
//! This crate provides the foundational pieces for `lakelog`:
//!
//! - A Delta-style, append-only transaction log of newline-delimited JSON
//!   actions with per-version consistency digests and Parquet checkpoints
//!   (`transaction_log` module).
//! - A snapshot builder that reconstructs the live-file set as of any
//!   version or timestamp with bounded replay from the newest valid
//!   checkpoint.
//! - A [`table::LakeTable`] handle that drives optimistic-concurrency
//!   commits for INSERT/UPDATE/DELETE/MERGE, history, restore, optimize,
//!   vacuum and table properties (`table` module).
//! - A pluggable data-file codec with a Parquet implementation (`formats`
//!   module).
//! - Filesystem utilities for the on-disk layout and the atomic
//!   create-if-absent primitive the log relies on (`storage` module).
//!
//! Higher-level integration crates (a SQL layer, a CLI) are expected to
//! depend on this crate rather than re-implementing the log protocol.
#![deny(missing_docs)]
pub mod cancel;
pub mod config;
pub mod formats;
pub mod storage;
pub mod table;
pub mod transaction_log;

#[cfg(test)]
pub(crate) mod test_util;
