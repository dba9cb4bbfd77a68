//! Bounded retry with exponential backoff for idempotent reads.
//!
//! Only reads go through this helper. Appends have an ambiguous outcome on
//! failure (the file may or may not have landed) and are never retried here;
//! callers re-check the log instead.

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use log::debug;

use crate::storage::{StorageError, StorageResult};

/// Retry policy for transient storage failures on read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after every failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op`, retrying while it fails with a transient error.
    pub async fn run<T, F, Fut>(&self, what: &str, op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(StorageError::is_transient)
            .notify(|e: &StorageError, after: Duration| {
                debug!("transient failure during {what}: {e}; retrying in {after:?}");
            })
            .await
    }
}
