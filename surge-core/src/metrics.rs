use crate::Aggregation;
use serde::{Deserialize, Serialize};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const CHECKS: &str = "checks";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
pub const DATA_RECEIVED: &str = "data_received";

/// Metric names a transaction records into.
#[derive(Copy, Clone, Debug)]
pub struct TransactionLabels {
    /// Counter incremented once per call.
    pub count: &'static str,
    /// Rate of calls which returned an error.
    pub failed: &'static str,
    /// Trend of call durations in milliseconds.
    pub duration: &'static str,
}

/// Labels used by the built-in HTTP helper.
pub const HTTP_LABELS: TransactionLabels = TransactionLabels {
    count: HTTP_REQS,
    failed: HTTP_REQ_FAILED,
    duration: HTTP_REQ_DURATION,
};

#[macro_export]
macro_rules! generate_labels {
    ($base_name:expr) => {
        ::surge::core::TransactionLabels {
            count: concat!(stringify!($base_name), "_count"),
            failed: concat!(stringify!($base_name), "_failed"),
            duration: concat!(stringify!($base_name), "_duration"),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum.
    Counter,
    /// Last-written value.
    Gauge,
    /// Fraction of samples which were `true`.
    Rate,
    /// Every sample, for percentile statistics.
    Trend,
}

impl MetricKind {
    /// The kind of a built-in metric, `None` for custom metrics.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            HTTP_REQS | ITERATIONS | DATA_RECEIVED => Some(MetricKind::Counter),
            VUS | VUS_MAX => Some(MetricKind::Gauge),
            HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
            HTTP_REQ_DURATION | ITERATION_DURATION => Some(MetricKind::Trend),
            _ => None,
        }
    }

    pub fn supports(&self, aggregation: &Aggregation) -> bool {
        use Aggregation::*;
        match self {
            MetricKind::Counter => matches!(aggregation, Count | Rate),
            MetricKind::Gauge => matches!(aggregation, Value | Min | Max),
            MetricKind::Rate => matches!(aggregation, Rate),
            MetricKind::Trend => matches!(aggregation, Avg | Min | Max | Med | Percentile(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds() {
        assert_eq!(MetricKind::builtin(HTTP_REQ_FAILED), Some(MetricKind::Rate));
        assert_eq!(
            MetricKind::builtin(HTTP_REQ_DURATION),
            Some(MetricKind::Trend)
        );
        assert_eq!(MetricKind::builtin("login_duration"), None);
    }

    #[test]
    fn supported_aggregations() {
        assert!(MetricKind::Trend.supports(&Aggregation::Percentile(95.)));
        assert!(!MetricKind::Trend.supports(&Aggregation::Rate));
        assert!(MetricKind::Counter.supports(&Aggregation::Rate));
        assert!(!MetricKind::Rate.supports(&Aggregation::Count));
        assert!(MetricKind::Gauge.supports(&Aggregation::Value));
    }
}
