use crate::measurement::Measurement;
use metrics_util::AtomicBucket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Transaction outcomes since the last collection, shared by every VU.
pub(crate) struct WindowAtomics {
    success: AtomicU64,
    error: AtomicU64,
    latency: AtomicBucket<Duration>,
}

impl WindowAtomics {
    pub fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            latency: AtomicBucket::new(),
        }
    }

    pub fn record(&self, ok: bool, elapsed: Duration) {
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.push(elapsed);
    }

    /// Swap the window out, resetting it for the next one.
    pub fn collect(&self, elapsed: Duration, vus: usize) -> Measurement {
        let success = self.success.swap(0, Ordering::Relaxed);
        let error = self.error.swap(0, Ordering::Relaxed);
        let mut measurement = Measurement::new(success, error, elapsed, vus);
        self.latency
            .clear_with(|dur| measurement.populate_latencies(dur));
        measurement
    }
}
