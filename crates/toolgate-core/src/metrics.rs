//! Process-wide counters for the execution core.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`] as one `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters; no allocation, no locking.
pub struct Metrics {
    plans_executed: AtomicU64,
    tasks_failed: AtomicU64,
    sandbox_runs: AtomicU64,
    rpc_calls: AtomicU64,
    capabilities_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            plans_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            sandbox_runs: AtomicU64::new(0),
            rpc_calls: AtomicU64::new(0),
            capabilities_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_plans_executed(&self) {
        self.plans_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plans_executed", "counter incremented");
    }

    pub fn add_tasks_failed(&self, n: u64) {
        if n > 0 {
            self.tasks_failed.fetch_add(n, Ordering::Relaxed);
            tracing::trace!(metric = "tasks_failed", n, "counter incremented");
        }
    }

    pub fn inc_sandbox_runs(&self) {
        self.sandbox_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_runs", "counter incremented");
    }

    pub fn inc_rpc_calls(&self) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rpc_calls", "counter incremented");
    }

    pub fn inc_capabilities_dropped(&self) {
        self.capabilities_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "capabilities_dropped", "counter incremented");
    }

    /// Emit all counters as a single `info!` event. Call at natural
    /// boundaries, not on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            plans_executed = self.plans_executed(),
            tasks_failed = self.tasks_failed(),
            sandbox_runs = self.sandbox_runs(),
            rpc_calls = self.rpc_calls(),
            capabilities_dropped = self.capabilities_dropped(),
        );
    }

    pub fn plans_executed(&self) -> u64 {
        self.plans_executed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn sandbox_runs(&self) -> u64 {
        self.sandbox_runs.load(Ordering::Relaxed)
    }

    pub fn rpc_calls(&self) -> u64 {
        self.rpc_calls.load(Ordering::Relaxed)
    }

    pub fn capabilities_dropped(&self) -> u64 {
        self.capabilities_dropped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.plans_executed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.sandbox_runs.store(0, Ordering::Relaxed);
        self.rpc_calls.store(0, Ordering::Relaxed);
        self.capabilities_dropped.store(0, Ordering::Relaxed);
    }
}
