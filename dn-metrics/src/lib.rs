#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod collector;
mod histogram;

use std::sync::atomic::{AtomicU64, Ordering};

pub use collector::{
    Collector, HistogramBackend, MetricsBackend, Sample, TimerHandle, TracingBackend,
};
pub use histogram::{LatencyHistogram, LatencySnapshot};

pub static PACKETS_RECEIVED: AtomicU64 = AtomicU64::new(0);
pub static PACKETS_FAILED: AtomicU64 = AtomicU64::new(0);
pub static FORWARDS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static FORWARD_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static CONNECTIONS_ACTIVE: AtomicU64 = AtomicU64::new(0);
pub static CONNECTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static CONNECTIONS_EVICTED: AtomicU64 = AtomicU64::new(0);
pub static CONNECTIONS_REUSED: AtomicU64 = AtomicU64::new(0);
pub static POOL_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
pub static SAMPLES_DROPPED: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn increment_packets_received() {
    PACKETS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_packets_failed() {
    PACKETS_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_forwards() {
    FORWARDS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_forward_failures() {
    FORWARD_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_connections() {
    CONNECTIONS_ACTIVE.fetch_add(1, Ordering::Relaxed);
    CONNECTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn decrement_connections() {
    CONNECTIONS_ACTIVE.fetch_sub(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_connections_evicted() {
    CONNECTIONS_EVICTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_connections_reused() {
    CONNECTIONS_REUSED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_pool_exhausted() {
    POOL_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_samples_dropped() {
    SAMPLES_DROPPED.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the global counters, for logging on shutdown.
#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub packets_received: u64,
    pub packets_failed: u64,
    pub forwards_total: u64,
    pub forward_failures: u64,
    pub connections_active: u64,
    pub connections_evicted: u64,
    pub connections_reused: u64,
    pub pool_exhausted: u64,
    pub samples_dropped: u64,
}

impl CounterSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            packets_received: PACKETS_RECEIVED.load(Ordering::Relaxed),
            packets_failed: PACKETS_FAILED.load(Ordering::Relaxed),
            forwards_total: FORWARDS_TOTAL.load(Ordering::Relaxed),
            forward_failures: FORWARD_FAILURES.load(Ordering::Relaxed),
            connections_active: CONNECTIONS_ACTIVE.load(Ordering::Relaxed),
            connections_evicted: CONNECTIONS_EVICTED.load(Ordering::Relaxed),
            connections_reused: CONNECTIONS_REUSED.load(Ordering::Relaxed),
            pool_exhausted: POOL_EXHAUSTED.load(Ordering::Relaxed),
            samples_dropped: SAMPLES_DROPPED.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let before = CounterSnapshot::capture();
        increment_packets_received();
        increment_connections_evicted();
        let after = CounterSnapshot::capture();

        assert!(after.packets_received > before.packets_received);
        assert!(after.connections_evicted > before.connections_evicted);
    }
}
