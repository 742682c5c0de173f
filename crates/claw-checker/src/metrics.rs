//! Process-wide checker counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by checks and workers.
#[derive(Debug, Default)]
pub struct CheckerMetrics {
    checks: AtomicU64,
    check_errors: AtomicU64,
    evaluation_exceptions: AtomicU64,
    panics: AtomicU64,
    events: AtomicU64,
    events_drained: AtomicU64,
    muted: AtomicU64,
}

/// A point-in-time copy of [`CheckerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Completed checks.
    pub checks: u64,
    /// Checks that failed with an infrastructure error.
    pub check_errors: u64,
    /// Checks that hit an unexpected evaluation error.
    pub evaluation_exceptions: u64,
    /// Checks that panicked.
    pub panics: u64,
    /// Events emitted.
    pub events: u64,
    /// Events handed off by the event drain.
    pub events_drained: u64,
    /// Events or checks skipped because of a mute condition.
    pub muted: u64,
}

impl CheckerMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a completed check.
    pub fn check_done(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failed check.
    pub fn check_failed(&self) {
        self.check_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an unexpected evaluation error.
    pub fn evaluation_exception(&self) {
        self.evaluation_exceptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a panicked check.
    pub fn panicked(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts emitted events.
    pub fn events_sent(&self, count: usize) {
        self.events.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Counts drained events.
    pub fn events_drained(&self, count: usize) {
        self.events_drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Counts a mute.
    pub fn muted(&self) {
        self.muted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            check_errors: self.check_errors.load(Ordering::Relaxed),
            evaluation_exceptions: self.evaluation_exceptions.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            events_drained: self.events_drained.load(Ordering::Relaxed),
            muted: self.muted.load(Ordering::Relaxed),
        }
    }
}
