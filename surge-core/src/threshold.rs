use crate::config::human_duration_opt;
use crate::ThresholdParseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Metric name to the thresholds asserted over it.
pub type Thresholds = BTreeMap<String, Vec<ThresholdSpec>>;

/// The statistic a threshold compares against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Count,
    Rate,
    Value,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in the range `0..=100`.
    Percentile(f64),
}

impl FromStr for Aggregation {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let aggregation = match s {
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdParseError::UnknownAggregation(s.to_string()))?;

                let pct = inner
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ThresholdParseError::InvalidPercentile(inner.to_string()))?;

                if !(0. ..=100.).contains(&pct) {
                    return Err(ThresholdParseError::InvalidPercentile(inner.to_string()));
                }

                Aggregation::Percentile(pct)
            }
        };

        Ok(aggregation)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Count => write!(f, "count"),
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Value => write!(f, "value"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(pct) => write!(f, "p({pct})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    // Longest tokens first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Operator); 7] = [
        ("===", Operator::Eq),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];

    fn split_prefix(s: &str) -> Option<(Operator, &str)> {
        Self::TOKENS
            .iter()
            .find_map(|(token, op)| s.strip_prefix(token).map(|rest| (*op, rest)))
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

/// A parsed threshold expression such as `p(95)<500` or `rate<0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub aggregation: Aggregation,
    pub op: Operator,
    pub value: f64,
    source: String,
}

impl Threshold {
    /// The expression as it was written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the observed aggregate satisfies the expression.
    pub fn holds(&self, observed: f64) -> bool {
        self.op.apply(observed, self.value)
    }
}

impl FromStr for Threshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ThresholdParseError::Empty);
        }

        let op_start = trimmed
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| ThresholdParseError::MissingOperator(trimmed.to_string()))?;
        let (lhs, rest) = trimmed.split_at(op_start);

        let aggregation = lhs.parse::<Aggregation>()?;
        let (op, rhs) = Operator::split_prefix(rest)
            .ok_or_else(|| ThresholdParseError::MissingOperator(trimmed.to_string()))?;

        let rhs = rhs.trim();
        let value = rhs
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(rhs.to_string()))?;

        Ok(Self {
            aggregation,
            op,
            value,
            source: trimmed.to_string(),
        })
    }
}

impl TryFrom<String> for Threshold {
    type Error = ThresholdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A threshold plus the options controlling early abort.
///
/// Deserializes from either the bare expression (`"rate<0.01"`) or the object form
/// `{"threshold": "rate<0.01", "abortOnFail": true, "delayAbortEval": "10s"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholdSpec", into = "RawThresholdSpec")]
pub struct ThresholdSpec {
    pub threshold: Threshold,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdSpec {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            threshold,
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    /// Stop the run as soon as the threshold is crossed, once `delay` has elapsed.
    pub fn abort_on_fail(mut self, delay: Option<Duration>) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

impl From<Threshold> for ThresholdSpec {
    fn from(threshold: Threshold) -> Self {
        Self::new(threshold)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawThresholdSpec {
    Expr(String),
    Object {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(
            default,
            rename = "delayAbortEval",
            with = "human_duration_opt",
            skip_serializing_if = "Option::is_none"
        )]
        delay_abort_eval: Option<Duration>,
    },
}

impl TryFrom<RawThresholdSpec> for ThresholdSpec {
    type Error = ThresholdParseError;

    fn try_from(raw: RawThresholdSpec) -> Result<Self, Self::Error> {
        match raw {
            RawThresholdSpec::Expr(expr) => Ok(Self::new(expr.parse()?)),
            RawThresholdSpec::Object {
                threshold,
                abort_on_fail,
                delay_abort_eval,
            } => Ok(Self {
                threshold: threshold.parse()?,
                abort_on_fail,
                delay_abort_eval,
            }),
        }
    }
}

impl From<ThresholdSpec> for RawThresholdSpec {
    fn from(spec: ThresholdSpec) -> Self {
        if spec.abort_on_fail || spec.delay_abort_eval.is_some() {
            RawThresholdSpec::Object {
                threshold: spec.threshold.source,
                abort_on_fail: spec.abort_on_fail,
                delay_abort_eval: spec.delay_abort_eval,
            }
        } else {
            RawThresholdSpec::Expr(spec.threshold.source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_expression() {
        let t: Threshold = "rate<0.01".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.op, Operator::Lt);
        assert_eq!(t.value, 0.01);
        assert_eq!(t.source(), "rate<0.01");
    }

    #[test]
    fn parses_percentile_with_whitespace() {
        let t: Threshold = " p(95) <= 500 ".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(95.));
        assert_eq!(t.op, Operator::Le);
        assert_eq!(t.value, 500.);

        let t: Threshold = "p(99.9)<1500".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(99.9));
    }

    #[test]
    fn parses_every_operator() {
        let cases = [
            ("avg<1", Operator::Lt),
            ("avg<=1", Operator::Le),
            ("avg>1", Operator::Gt),
            ("avg>=1", Operator::Ge),
            ("avg==1", Operator::Eq),
            ("avg===1", Operator::Eq),
            ("avg!=1", Operator::Ne),
        ];
        for (expr, op) in cases {
            assert_eq!(expr.parse::<Threshold>().unwrap().op, op, "{expr}");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!("".parse::<Threshold>(), Err(ThresholdParseError::Empty));
        assert_eq!(
            "p95<500".parse::<Threshold>(),
            Err(ThresholdParseError::UnknownAggregation("p95".into()))
        );
        assert_eq!(
            "p(101)<500".parse::<Threshold>(),
            Err(ThresholdParseError::InvalidPercentile("101".into()))
        );
        assert_eq!(
            "rate 0.01".parse::<Threshold>(),
            Err(ThresholdParseError::MissingOperator("rate 0.01".into()))
        );
        assert_eq!(
            "rate=0.01".parse::<Threshold>(),
            Err(ThresholdParseError::MissingOperator("rate=0.01".into()))
        );
        assert_eq!(
            "rate<abc".parse::<Threshold>(),
            Err(ThresholdParseError::InvalidValue("abc".into()))
        );
    }

    #[test]
    fn holds_compares_observed_against_value() {
        let t: Threshold = "p(95)<500".parse().unwrap();
        assert!(t.holds(499.9));
        assert!(!t.holds(500.));
    }

    #[test]
    fn spec_deserializes_both_forms() {
        let specs: Vec<ThresholdSpec> = serde_json::from_str(
            r#"["rate<0.01", {"threshold": "p(95)<500", "abortOnFail": true, "delayAbortEval": "10s"}]"#,
        )
        .unwrap();

        assert!(!specs[0].abort_on_fail);
        assert_eq!(specs[0].threshold.source(), "rate<0.01");
        assert!(specs[1].abort_on_fail);
        assert_eq!(specs[1].delay_abort_eval, Some(Duration::from_secs(10)));
        assert_eq!(specs[1].threshold.aggregation, Aggregation::Percentile(95.));
    }

    #[test]
    fn spec_rejects_bad_expression() {
        let res: Result<ThresholdSpec, _> = serde_json::from_str(r#""rate<<0.01""#);
        assert!(res.is_err());
    }

    #[test]
    fn spec_serializes_compactly() {
        let plain = ThresholdSpec::new("rate<0.01".parse().unwrap());
        assert_eq!(serde_json::to_string(&plain).unwrap(), r#""rate<0.01""#);

        let aborting = plain.abort_on_fail(None);
        assert_eq!(
            serde_json::to_string(&aborting).unwrap(),
            r#"{"threshold":"rate<0.01","abortOnFail":true}"#
        );
    }
}
