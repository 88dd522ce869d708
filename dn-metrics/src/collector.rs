//! Timer side channel for packet handling.
//!
//! Handlers call `Collector::start_timer(key)` before dispatch and
//! `TimerHandle::stop()` afterwards. Stopped timers are pushed into a bounded
//! channel with `try_send`, and a background task fans each sample out to
//! every registered backend. A full or closed channel drops the sample: the
//! caller is never blocked and never sees an error.

use crate::histogram::{LatencyHistogram, LatencySnapshot};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct Sample {
    pub key: String,
    pub elapsed: Duration,
}

/// Destination for published samples.
pub trait MetricsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish(&self, sample: &Sample);
}

/// Keeps one latency histogram per timer key.
#[derive(Default)]
pub struct HistogramBackend {
    histograms: RwLock<HashMap<String, Arc<LatencyHistogram>>>,
}

impl HistogramBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<LatencySnapshot> {
        self.histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|h| h.snapshot())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl MetricsBackend for HistogramBackend {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn publish(&self, sample: &Sample) {
        let existing = self
            .histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sample.key)
            .cloned();

        let histogram = match existing {
            Some(h) => h,
            None => Arc::clone(
                self.histograms
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(sample.key.clone())
                    .or_default(),
            ),
        };
        histogram.record(sample.elapsed);
    }
}

/// Emits every sample as a trace event.
pub struct TracingBackend;

impl MetricsBackend for TracingBackend {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn publish(&self, sample: &Sample) {
        trace!(
            target: "datanode::metrics",
            key = %sample.key,
            elapsed_us = u64::try_from(sample.elapsed.as_micros()).unwrap_or(u64::MAX),
            "timer"
        );
    }
}

/// Cheap, cloneable handle to the collector task.
#[derive(Clone, Default)]
pub struct Collector {
    tx: Option<mpsc::Sender<Sample>>,
}

impl Collector {
    /// A collector that discards every sample.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Spawn the fan-out task on the current tokio runtime.
    ///
    /// The task exits once every `Collector` clone and outstanding
    /// `TimerHandle` has been dropped and the queue is drained.
    #[must_use]
    pub fn start(
        capacity: usize,
        backends: Vec<Arc<dyn MetricsBackend>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Sample>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                for backend in &backends {
                    backend.publish(&sample);
                }
            }
            debug!(target: "datanode::metrics", "Metrics collector drained");
        });
        (Self { tx: Some(tx) }, handle)
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn start_timer(&self, key: impl Into<String>) -> TimerHandle {
        TimerHandle {
            key: key.into(),
            started: Instant::now(),
            tx: self.tx.clone(),
        }
    }
}

/// A running timer; publish it with `stop`.
pub struct TimerHandle {
    key: String,
    started: Instant,
    tx: Option<mpsc::Sender<Sample>>,
}

impl TimerHandle {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop the timer and publish the elapsed time. Returns the elapsed time
    /// whether or not the sample was accepted.
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(tx) = self.tx {
            let sample = Sample {
                key: self.key,
                elapsed,
            };
            if tx.try_send(sample).is_err() {
                crate::increment_samples_dropped();
            }
        }
        elapsed
    }
}
