//! Engine-level policy for a table handle.
//!
//! These values are per handle, never process-wide, so several tables with
//! different policies can live in one process. Table-scoped settings that
//! must be shared by every writer (retention windows, checkpoint cadence)
//! live in the table's `Metadata.configuration` instead; see
//! [`crate::transaction_log::TableConfig`].

use crate::storage::RetryPolicy;

/// Default number of versions between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;

/// Default number of attempts a commit makes before giving up.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 10;

/// Default output size for compaction.
pub const DEFAULT_TARGET_FILE_SIZE: u64 = 128 * 1024 * 1024;

/// Default size below which a live file is a compaction candidate.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Engine policy for a [`crate::table::LakeTable`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Versions between automatic checkpoints when the table does not set
    /// `delta.checkpointInterval`. `0` disables automatic checkpoints.
    pub checkpoint_interval: u64,
    /// Attempts (first try included) before a non-conflicting commit gives up.
    pub max_commit_attempts: u32,
    /// Vacuum guardrail: refuse retention windows shorter than the table's
    /// `delta.deletedFileRetentionDuration` unless a call forces it.
    pub retention_duration_check_enabled: bool,
    /// Retry policy for idempotent log reads.
    pub read_retry: RetryPolicy,
    /// Compaction output size.
    pub target_file_size: u64,
    /// Files strictly smaller than this are compaction candidates.
    pub min_file_size: u64,
    /// Free-form engine identifier recorded in every commit.
    pub engine_info: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            retention_duration_check_enabled: true,
            read_retry: RetryPolicy::default(),
            target_file_size: DEFAULT_TARGET_FILE_SIZE,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            engine_info: Some(concat!("lakelog/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl EngineConfig {
    /// Set the automatic checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the commit attempt limit (values below 1 are treated as 1).
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    /// Enable or disable the vacuum retention guardrail.
    pub fn with_retention_duration_check(mut self, enabled: bool) -> Self {
        self.retention_duration_check_enabled = enabled;
        self
    }

    /// Set the read retry policy.
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Set compaction sizing.
    pub fn with_file_sizes(mut self, min_file_size: u64, target_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self.target_file_size = target_file_size;
        self
    }
}
