use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Outcome of a single named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Aggregated values of one metric at the end of a run.
///
/// Trend values are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter {
        count: u64,
        rate: f64,
    },
    Gauge {
        value: f64,
        min: f64,
        max: f64,
    },
    Rate {
        passes: u64,
        fails: u64,
        rate: f64,
    },
    Trend {
        count: u64,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        p90: f64,
        p95: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn passed(&self) -> bool {
        self.fails == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub threshold: String,
    /// The aggregate the threshold was compared against, `None` if the metric had no data.
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
}

/// Run Statistics for a given Scenario
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub name: String,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub elapsed: Duration,
    /// Whether an `abortOnFail` threshold stopped the run early.
    pub aborted: bool,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunStatistics {
    /// Whether every threshold passed and none of them stopped the run.
    pub fn passed(&self) -> bool {
        !self.aborted && self.thresholds.iter().all(|t| t.passed)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn threshold(&self, metric: &str, threshold: &str) -> Option<&ThresholdResult> {
        self.thresholds
            .iter()
            .find(|t| t.metric == metric && t.threshold == threshold)
    }

    /// Count of a counter metric, 0 when absent.
    pub fn count(&self, name: &str) -> u64 {
        match self.metrics.get(name) {
            Some(MetricSummary::Counter { count, .. }) => *count,
            Some(MetricSummary::Trend { count, .. }) => *count,
            _ => 0,
        }
    }
}

fn mark(passed: bool) -> char {
    if passed {
        '✓'
    } else {
        '✗'
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSummary::Counter { count, rate } => write!(f, "{count} {rate:.2}/s"),
            MetricSummary::Gauge { value, min, max } => {
                write!(f, "{value} min={min} max={max}")
            }
            MetricSummary::Rate {
                passes,
                fails,
                rate,
            } => write!(f, "{:.2}% ✓ {passes} ✗ {fails}", rate * 100.),
            MetricSummary::Trend {
                avg,
                min,
                med,
                max,
                p90,
                p95,
                ..
            } => write!(
                f,
                "avg={avg:.2}ms min={min:.2}ms med={med:.2}ms max={max:.2}ms p(90)={p90:.2}ms p(95)={p95:.2}ms"
            ),
        }
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = Duration::from_millis(self.elapsed.as_millis() as u64);
        writeln!(
            f,
            "scenario {} finished in {}{}",
            self.name,
            humantime::format_duration(elapsed),
            if self.aborted { " (aborted)" } else { "" }
        )?;

        if !self.checks.is_empty() {
            writeln!(f)?;
            for check in &self.checks {
                writeln!(
                    f,
                    "  {} {} (✓ {} ✗ {})",
                    mark(check.passed()),
                    check.name,
                    check.passes,
                    check.fails
                )?;
            }
        }

        if !self.thresholds.is_empty() {
            writeln!(f)?;
            for t in &self.thresholds {
                let observed = t
                    .observed
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "no data".to_string());
                writeln!(
                    f,
                    "  {} {}: {} (observed {})",
                    mark(t.passed),
                    t.metric,
                    t.threshold,
                    observed
                )?;
            }
        }

        writeln!(f)?;
        let width = self.metrics.keys().map(String::len).max().unwrap_or(0) + 3;
        for (name, summary) in &self.metrics {
            writeln!(f, "  {name:.<width$}: {summary}")?;
        }

        Ok(())
    }
}
