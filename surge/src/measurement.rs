use pdatastructs::tdigest::{TDigest, K1};
use std::fmt;
use std::time::Duration;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Throughput, error rate and latency quantiles over one measurement window.
#[derive(Debug, Clone)]
pub(crate) struct Measurement {
    pub tps: f64,
    pub error_rate: f64,
    pub elapsed: Duration,
    pub vus: usize,
    samples: usize,
    latency: TDigest<K1>,
}

impl Measurement {
    pub fn new(success: u64, error: u64, elapsed: Duration, vus: usize) -> Self {
        let total = success + error;
        let tps = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        let error_rate = if total == 0 {
            0.
        } else {
            error as f64 / total as f64
        };
        Self {
            tps,
            error_rate,
            elapsed,
            vus,
            samples: 0,
            latency: default_tdigest(),
        }
    }

    pub fn populate_latencies(&mut self, dur: &[Duration]) {
        for latency in dur {
            self.latency.insert(latency.as_secs_f64());
        }
        self.samples += dur.len();
    }

    pub fn latency(&self, quantile: f64) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }

        let secs = self.latency.quantile(quantile);

        // TDigest occasionally yields NaN for tiny sample counts.
        let secs = if secs.is_finite() {
            secs.max(0.)
        } else {
            error!("NaN latency calculation over {} samples.", self.samples);
            0.
        };

        Duration::from_secs_f64(secs)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VUs={}, TPS={:.2}, ErrorRate={:.2}, p50={:?}, p90={:?}, p99={:?}",
            self.vus,
            self.tps,
            self.error_rate,
            self.latency(0.5),
            self.latency(0.90),
            self.latency(0.99),
        )
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}
