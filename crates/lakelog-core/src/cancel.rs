//! Cooperative cancellation for long-running log replays and vacuum scans.
//!
//! Workers poll the signal between file-level steps. Work done before the
//! check is always safe to discard: replay is read-only and every vacuum
//! deletion is individually idempotent.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A cloneable cancellation flag shared between a caller and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create a new signal in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = CancelSignal::new();
        let worker = signal.clone();
        assert!(!worker.is_cancelled());

        signal.cancel();
        assert!(worker.is_cancelled());
    }
}
