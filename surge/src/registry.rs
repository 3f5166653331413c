//! Metric sinks shared by every VU of a run.
//!
//! Sinks are created on first use. Counters and rates are plain atomics; trend samples are pushed
//! into a lock-free bucket and only moved into the sorted sample list when the control loop drains
//! them, so recording never contends on a lock.
use crate::measurement::Measurement;
use crate::window::WindowAtomics;
use metrics_util::AtomicBucket;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};
use std::time::Duration;
use surge_core::{
    Aggregation, CheckSummary, MetricKind, MetricSummary, TransactionLabels, CHECKS,
    DATA_RECEIVED, ITERATIONS, ITERATION_DURATION,
};
#[allow(unused)]
use tracing::{debug, error, trace};

pub(crate) struct MetricRegistry {
    sinks: RwLock<HashMap<String, Arc<Sink>>>,
    checks: RwLock<Vec<(String, Arc<RateSink>)>>,
    window: WindowAtomics,
}

/// The result of aggregating a metric for a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Observed {
    NoData,
    Unsupported(MetricKind),
    Value(f64),
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            checks: RwLock::new(vec![]),
            window: WindowAtomics::new(),
        }
    }

    pub fn add_counter(&self, name: &str, n: u64) {
        if let Some(Sink::Counter(counter)) = self.sink(name, MetricKind::Counter).as_deref() {
            counter.count.fetch_add(n, Ordering::Relaxed);
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(name.to_string()).increment(n);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if let Some(Sink::Gauge(gauge)) = self.sink(name, MetricKind::Gauge).as_deref() {
            gauge.set(value);
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!(name.to_string()).set(value);
    }

    pub fn add_rate(&self, name: &str, value: bool) {
        if let Some(Sink::Rate(rate)) = self.sink(name, MetricKind::Rate).as_deref() {
            rate.add(value);
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(name.to_string(), "value" => if value { "true" } else { "false" })
            .increment(1);
    }

    pub fn add_trend(&self, name: &str, value: f64) {
        if let Some(Sink::Trend(trend)) = self.sink(name, MetricKind::Trend).as_deref() {
            trend.pending.push(value);
        }

        #[cfg(feature = "metrics")]
        metrics::histogram!(name.to_string()).record(value);
    }

    pub fn record_transaction(&self, labels: TransactionLabels, elapsed: Duration, ok: bool) {
        self.add_counter(labels.count, 1);
        self.add_rate(labels.failed, !ok);
        self.add_trend(labels.duration, as_millis(elapsed));
        self.window.record(ok, elapsed);
    }

    pub fn record_iteration(&self, elapsed: Duration) {
        self.add_counter(ITERATIONS, 1);
        self.add_trend(ITERATION_DURATION, as_millis(elapsed));
    }

    pub fn record_data_received(&self, bytes: u64) {
        self.add_counter(DATA_RECEIVED, bytes);
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        let existing = read(&self.checks)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tally)| tally.clone());

        let tally = match existing {
            Some(tally) => tally,
            None => {
                let mut checks = write(&self.checks);
                // Another VU may have registered it between the two locks.
                match checks.iter().find(|(n, _)| n == name) {
                    Some((_, tally)) => tally.clone(),
                    None => {
                        let tally = Arc::new(RateSink::default());
                        checks.push((name.to_string(), tally.clone()));
                        tally
                    }
                }
            }
        };

        tally.add(passed);
        self.add_rate(CHECKS, passed);
    }

    /// Close the current measurement window.
    pub fn collect_window(&self, elapsed: Duration, vus: usize) -> Measurement {
        self.window.collect(elapsed, vus)
    }

    /// Move pending trend samples into their sinks.
    pub fn drain(&self) {
        for sink in read(&self.sinks).values() {
            if let Sink::Trend(trend) = sink.as_ref() {
                trend.drain();
            }
        }
    }

    pub fn observe(&self, name: &str, aggregation: &Aggregation, elapsed: Duration) -> Observed {
        let Some(sink) = read(&self.sinks).get(name).cloned() else {
            return Observed::NoData;
        };

        if !sink.kind().supports(aggregation) {
            return Observed::Unsupported(sink.kind());
        }

        sink.aggregate(aggregation, elapsed)
    }

    pub fn summaries(&self, elapsed: Duration) -> BTreeMap<String, MetricSummary> {
        read(&self.sinks)
            .iter()
            .map(|(name, sink)| (name.clone(), sink.summary(elapsed)))
            .collect()
    }

    pub fn check_summaries(&self) -> Vec<CheckSummary> {
        read(&self.checks)
            .iter()
            .map(|(name, tally)| {
                let (passes, total) = tally.counts();
                CheckSummary {
                    name: name.clone(),
                    passes,
                    fails: total - passes,
                }
            })
            .collect()
    }

    fn sink(&self, name: &str, kind: MetricKind) -> Option<Arc<Sink>> {
        if let Some(sink) = read(&self.sinks).get(name) {
            return matching(name, sink, kind);
        }

        let mut sinks = write(&self.sinks);
        let sink = sinks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Sink::new(kind)));
        matching(name, sink, kind)
    }
}

fn matching(name: &str, sink: &Arc<Sink>, kind: MetricKind) -> Option<Arc<Sink>> {
    if sink.kind() == kind {
        Some(sink.clone())
    } else {
        error!(
            "Metric {name} is a {:?}, not a {kind:?}. Dropping sample.",
            sink.kind()
        );
        None
    }
}

// A panicking VU must not take metrics down with it, so poisoned locks are recovered.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn as_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1_000.
}

pub(crate) enum Sink {
    Counter(CounterSink),
    Gauge(GaugeSink),
    Rate(RateSink),
    Trend(TrendSink),
}

impl Sink {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Sink::Counter(CounterSink::default()),
            MetricKind::Gauge => Sink::Gauge(GaugeSink::default()),
            MetricKind::Rate => Sink::Rate(RateSink::default()),
            MetricKind::Trend => Sink::Trend(TrendSink::new()),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Sink::Counter(_) => MetricKind::Counter,
            Sink::Gauge(_) => MetricKind::Gauge,
            Sink::Rate(_) => MetricKind::Rate,
            Sink::Trend(_) => MetricKind::Trend,
        }
    }

    fn aggregate(&self, aggregation: &Aggregation, elapsed: Duration) -> Observed {
        let value = match (self, aggregation) {
            (Sink::Counter(c), Aggregation::Count) => c.count() as f64,
            (Sink::Counter(c), Aggregation::Rate) => per_second(c.count(), elapsed),
            (Sink::Gauge(g), agg) => {
                let Some(state) = g.state() else {
                    return Observed::NoData;
                };
                match agg {
                    Aggregation::Min => state.min,
                    Aggregation::Max => state.max,
                    _ => state.value,
                }
            }
            (Sink::Rate(r), _) => r.rate(),
            (Sink::Trend(t), agg) => t.aggregate(agg),
            _ => return Observed::Unsupported(self.kind()),
        };

        Observed::Value(value)
    }

    fn summary(&self, elapsed: Duration) -> MetricSummary {
        match self {
            Sink::Counter(c) => MetricSummary::Counter {
                count: c.count(),
                rate: per_second(c.count(), elapsed),
            },
            Sink::Gauge(g) => {
                let state = g.state().unwrap_or_default();
                MetricSummary::Gauge {
                    value: state.value,
                    min: state.min,
                    max: state.max,
                }
            }
            Sink::Rate(r) => {
                let (passes, total) = r.counts();
                MetricSummary::Rate {
                    passes,
                    fails: total - passes,
                    rate: r.rate(),
                }
            }
            Sink::Trend(t) => t.summary(),
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0. {
        count as f64 / secs
    } else {
        0.
    }
}

#[derive(Default)]
pub(crate) struct CounterSink {
    count: AtomicU64,
}

impl CounterSink {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub(crate) struct GaugeSink {
    state: Mutex<Option<GaugeState>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct GaugeState {
    value: f64,
    min: f64,
    max: f64,
}

impl GaugeSink {
    fn set(&self, value: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = Some(match *state {
            Some(prev) => GaugeState {
                value,
                min: prev.min.min(value),
                max: prev.max.max(value),
            },
            None => GaugeState {
                value,
                min: value,
                max: value,
            },
        });
    }

    fn state(&self) -> Option<GaugeState> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
pub(crate) struct RateSink {
    trues: AtomicU64,
    total: AtomicU64,
}

impl RateSink {
    fn add(&self, value: bool) {
        if value {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// `(trues, total)`
    fn counts(&self) -> (u64, u64) {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed).min(total);
        (trues, total)
    }

    fn rate(&self) -> f64 {
        match self.counts() {
            (_, 0) => 0.,
            (trues, total) => trues as f64 / total as f64,
        }
    }
}

pub(crate) struct TrendSink {
    pending: AtomicBucket<f64>,
    values: Mutex<TrendValues>,
}

#[derive(Default)]
struct TrendValues {
    values: Vec<f64>,
    /// Length of the sorted prefix of `values`.
    sorted: usize,
}

impl TrendValues {
    /// Sort samples added since the last call and merge them into the sorted prefix.
    fn sort(&mut self) {
        if self.sorted == self.values.len() {
            return;
        }

        let mut fresh = self.values.split_off(self.sorted);
        fresh.sort_unstable_by(f64::total_cmp);
        let sorted = std::mem::take(&mut self.values);
        self.values = merge_sorted(sorted, fresh);
        self.sorted = self.values.len();
    }
}

fn merge_sorted(a: Vec<f64>, b: Vec<f64>) -> Vec<f64> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let next = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) if x.total_cmp(y).is_le() => a.next(),
            (Some(_), Some(_)) => b.next(),
            (Some(_), None) => a.next(),
            (None, Some(_)) => b.next(),
            (None, None) => break,
        };
        merged.extend(next);
    }
    merged
}

impl TrendSink {
    fn new() -> Self {
        Self {
            pending: AtomicBucket::new(),
            values: Mutex::new(TrendValues::default()),
        }
    }

    fn drain(&self) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        self.pending.clear_with(|chunk| {
            if !chunk.is_empty() {
                values.values.extend_from_slice(chunk);
            }
        });
    }

    fn with_sorted<R>(&self, f: impl FnOnce(&[f64]) -> R) -> R {
        self.drain();
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.sort();
        f(&values.values)
    }

    fn aggregate(&self, aggregation: &Aggregation) -> f64 {
        self.with_sorted(|sorted| match aggregation {
            Aggregation::Avg => mean(sorted),
            Aggregation::Min => sorted.first().copied().unwrap_or(0.),
            Aggregation::Max => sorted.last().copied().unwrap_or(0.),
            Aggregation::Med => percentile(sorted, 0.5),
            Aggregation::Percentile(pct) => percentile(sorted, pct / 100.),
            _ => 0.,
        })
    }

    fn summary(&self) -> MetricSummary {
        self.with_sorted(|sorted| MetricSummary::Trend {
            count: sorted.len() as u64,
            avg: mean(sorted),
            min: sorted.first().copied().unwrap_or(0.),
            med: percentile(sorted, 0.5),
            max: sorted.last().copied().unwrap_or(0.),
            p90: percentile(sorted, 0.9),
            p95: percentile(sorted, 0.95),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.
    } else {
        statistical::mean(values)
    }
}

/// Linear interpolation between the closest ranks of `sorted`, `pct` in `0..=1`.
pub(crate) fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.,
        1 => sorted[0],
        n => {
            let i = pct.clamp(0., 1.) * (n - 1) as f64;
            let lower = sorted[i.floor() as usize];
            let upper = sorted[i.ceil() as usize];
            lower + (upper - lower) * (i - i.floor())
        }
    }
}
