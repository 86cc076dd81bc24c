//! Per-run abort flag for cooperative cancellation.
//!
//! Every synchronization pass gets a fresh flag. The control thread writes it
//! once to cancel the run; the worker reads it with relaxed loads at the top
//! of each per-node recursion and between directory entries, keeping
//! cancellation latency proportional to one directory's entry count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one synchronization run.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Creates a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Write-once per run; later sets are harmless.
    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true if cancellation was requested.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
