use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker counters, readable while the worker runs.
#[derive(Debug, Default)]
pub struct IngestionStats {
    delivered: AtomicU64,
    lost: AtomicU64,
    sink_failures: AtomicU64,
    loss_streaks: AtomicU64,
    unmonitored: AtomicU64,
}

impl IngestionStats {
    /// Entries accepted by the sink.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Records dropped because their schema could not be resolved.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Entries the sink returned an error for.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Consecutive-loss streaks started, one warning each.
    pub fn loss_streaks(&self) -> u64 {
        self.loss_streaks.load(Ordering::Relaxed)
    }

    /// Records skipped because their provider is not bound.
    pub fn unmonitored(&self) -> u64 {
        self.unmonitored.load(Ordering::Relaxed)
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_loss_streak(&self) {
        self.loss_streaks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmonitored(&self) {
        self.unmonitored.fetch_add(1, Ordering::Relaxed);
    }
}
