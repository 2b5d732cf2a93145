//! Engine-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters describing how much data the engine had to discard.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    malformed_ticks: AtomicU64,
    rejected_updates: AtomicU64,
    dropped_events: AtomicU64,
    poll_batch_failures: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Stream frames that could not be parsed.
    pub malformed_ticks: u64,
    /// Ticks ignored because they were not newer than the stored quote.
    pub rejected_updates: u64,
    /// Events a lagging subscriber never saw.
    pub dropped_events: u64,
    /// Poll batch attempts that failed.
    pub poll_batch_failures: u64,
    /// Streaming sessions re-established after the first one.
    pub reconnects: u64,
}

impl EngineMetrics {
    pub(crate) fn inc_malformed_ticks(&self) {
        self.malformed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rejected_updates(&self) {
        self.rejected_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped_events(&self, n: u64) {
        self.dropped_events.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_poll_batch_failures(&self) {
        self.poll_batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed_ticks: self.malformed_ticks.load(Ordering::Relaxed),
            rejected_updates: self.rejected_updates.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            poll_batch_failures: self.poll_batch_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
