use crate::registry::{MetricRegistry, Observed};
use std::time::Duration;
use surge_core::{ThresholdResult, ThresholdSpec, Thresholds};
#[allow(unused)]
use tracing::{debug, error, warn};

/// Every configured threshold, flattened in metric order.
pub(crate) struct ThresholdSet {
    entries: Vec<(String, ThresholdSpec)>,
}

impl ThresholdSet {
    pub fn new(thresholds: &Thresholds) -> Self {
        let entries = thresholds
            .iter()
            .flat_map(|(metric, specs)| specs.iter().map(move |spec| (metric.clone(), spec.clone())))
            .collect();
        Self { entries }
    }

    /// The first abort-on-fail threshold currently failing, if any.
    ///
    /// Thresholds still inside their `delayAbortEval` period, or whose metric has not seen any
    /// samples yet, are skipped.
    pub fn check_abort(
        &self,
        registry: &MetricRegistry,
        elapsed: Duration,
    ) -> Option<ThresholdResult> {
        self.entries
            .iter()
            .filter(|(_, spec)| spec.abort_on_fail)
            .filter(|(_, spec)| elapsed >= spec.delay_abort_eval.unwrap_or_default())
            .filter_map(|(metric, spec)| {
                match registry.observe(metric, &spec.threshold.aggregation, elapsed) {
                    Observed::Value(value) if !spec.threshold.holds(value) => {
                        Some(result(metric, spec, Some(value), false))
                    }
                    _ => None,
                }
            })
            .next()
    }

    /// Evaluate every threshold against the run's final metrics.
    pub fn evaluate(&self, registry: &MetricRegistry, elapsed: Duration) -> Vec<ThresholdResult> {
        self.entries
            .iter()
            .map(|(metric, spec)| {
                let aggregation = &spec.threshold.aggregation;
                match registry.observe(metric, aggregation, elapsed) {
                    Observed::Value(value) => {
                        let passed = spec.threshold.holds(value);
                        debug!("{metric}: {} observed {value} passed={passed}", spec.threshold);
                        result(metric, spec, Some(value), passed)
                    }
                    Observed::NoData => {
                        warn!("No samples for {metric}, `{}` passes vacuously.", spec.threshold);
                        result(metric, spec, None, true)
                    }
                    Observed::Unsupported(kind) => {
                        error!(
                            "{metric} is a {kind:?} metric and cannot be aggregated as `{aggregation}`."
                        );
                        result(metric, spec, None, false)
                    }
                }
            })
            .collect()
    }
}

fn result(
    metric: &str,
    spec: &ThresholdSpec,
    observed: Option<f64>,
    passed: bool,
) -> ThresholdResult {
    ThresholdResult {
        metric: metric.to_string(),
        threshold: spec.threshold.to_string(),
        observed,
        passed,
        abort_on_fail: spec.abort_on_fail,
    }
}
