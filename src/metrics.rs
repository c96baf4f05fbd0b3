//! Atomic counters and gauges used for lightweight instrumentation.
//!
//! These are deliberately simple process-local primitives: components own
//! them explicitly instead of reporting through ambient global state, and
//! tests use them to observe invariants such as the bounded executor's
//! concurrency ceiling.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to the counter.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Up/down gauge that additionally records its high-watermark.
///
/// The watermark makes concurrency bounds observable: a component increments
/// the gauge when a task starts and decrements it when the task ends, and
/// [`Gauge::max_observed`] then reports the peak number of simultaneous tasks.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicU64,
    max: AtomicU64,
}

impl Gauge {
    /// Creates a gauge starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the gauge, updating the high-watermark.
    pub fn increment(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    /// Decrements the gauge. Callers must pair this with a prior increment.
    pub fn decrement(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the current value.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Returns the highest value the gauge ever reached.
    pub fn max_observed(&self) -> u64 {
        self.max.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn gauge_tracks_high_watermark() {
        let gauge = Gauge::new();
        gauge.increment();
        gauge.increment();
        gauge.decrement();
        gauge.increment();

        assert_eq!(gauge.current(), 2);
        assert_eq!(gauge.max_observed(), 2);
    }
}
