use crate::{
    ConfigError, MetricKind, ThresholdSpec, Thresholds, DEFAULT_GRACEFUL_PERIOD,
    DEFAULT_MAX_DURATION, DEFAULT_VUS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A time-boxed ramp towards `target` concurrent VUs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "human_duration")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub const fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Parses the CLI form `<duration>:<target>`, e.g. `2m:200`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidStage(s.to_string());

        let (duration, target) = s.split_once(':').ok_or_else(invalid)?;
        let duration = humantime::parse_duration(duration.trim()).map_err(|_| invalid())?;
        let target = target.trim().parse::<usize>().map_err(|_| invalid())?;

        Ok(Self { duration, target })
    }
}

/// Total time covered by a sequence of stages.
pub fn stages_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

/// Scenario options.
///
/// Field names follow the options-document format, so a JSON document such as
/// `{"stages": [{"duration": "2m", "target": 200}], "thresholds": {"http_req_failed": ["rate<0.01"]}}`
/// deserializes directly. Unknown fields are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Thresholds::is_empty")]
    pub thresholds: Thresholds,
    pub discard_response_bodies: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<usize>,
    #[serde(with = "human_duration_opt", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    #[serde(with = "human_duration")]
    pub graceful_ramp_down: Duration,
    #[serde(with = "human_duration")]
    pub graceful_stop: Duration,
    #[serde(with = "human_duration")]
    pub max_duration: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            stages: vec![],
            thresholds: Thresholds::new(),
            discard_response_bodies: false,
            vus: None,
            duration: None,
            iterations: None,
            graceful_ramp_down: DEFAULT_GRACEFUL_PERIOD,
            graceful_stop: DEFAULT_GRACEFUL_PERIOD,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

impl ScenarioConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn add_threshold(&mut self, metric: &str, spec: impl Into<ThresholdSpec>) {
        self.thresholds
            .entry(metric.to_string())
            .or_default()
            .push(spec.into());
    }

    /// Derive the executor which runs this configuration.
    ///
    /// Stages take precedence over iterations, which take precedence over a plain duration.
    pub fn executor(&self) -> Result<Executor, ConfigError> {
        let vus = self.vus.unwrap_or(DEFAULT_VUS);

        if !self.stages.is_empty() {
            Ok(Executor::RampingVus {
                start_vus: vus,
                stages: self.stages.clone(),
            })
        } else if let Some(iterations) = self.iterations {
            if vus == 0 {
                return Err(ConfigError::ZeroVus("shared iterations"));
            }
            Ok(Executor::SharedIterations {
                vus,
                iterations,
                max_duration: self.max_duration,
            })
        } else if let Some(duration) = self.duration {
            if vus == 0 {
                return Err(ConfigError::ZeroVus("constant VUs"));
            }
            Ok(Executor::ConstantVus { vus, duration })
        } else {
            Err(ConfigError::NoWorkload)
        }
    }

    /// How long the configured executor schedules work for, excluding graceful stop.
    pub fn total_duration(&self) -> Result<Duration, ConfigError> {
        Ok(self.executor()?.max_duration())
    }

    /// Check the configuration can be run, without running it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor()?;

        for (metric, specs) in &self.thresholds {
            if metric.contains('{') {
                return Err(ConfigError::SubmetricUnsupported(metric.clone()));
            }

            let Some(kind) = MetricKind::builtin(metric) else {
                debug!("{metric} is not a built-in metric, its thresholds are checked at the end of the run.");
                continue;
            };

            if let Some(spec) = specs
                .iter()
                .find(|spec| !kind.supports(&spec.threshold.aggregation))
            {
                return Err(ConfigError::UnsupportedAggregation {
                    metric: metric.clone(),
                    threshold: spec.threshold.source().to_string(),
                });
            }
        }

        Ok(())
    }
}

/// How VUs are scheduled for a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Executor {
    /// Ramp VUs through `stages`, starting from `start_vus`.
    RampingVus {
        start_vus: usize,
        stages: Vec<Stage>,
    },
    /// A fixed number of VUs for a fixed duration.
    ConstantVus { vus: usize, duration: Duration },
    /// `vus` VUs share a fixed budget of iterations, bounded by `max_duration`.
    SharedIterations {
        vus: usize,
        iterations: u64,
        max_duration: Duration,
    },
}

impl Executor {
    /// The longest this executor will schedule work for (excluding graceful stop).
    pub fn max_duration(&self) -> Duration {
        match self {
            Executor::RampingVus { stages, .. } => stages_duration(stages),
            Executor::ConstantVus { duration, .. } => *duration,
            Executor::SharedIterations { max_duration, .. } => *max_duration,
        }
    }
}

pub(crate) mod human_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }
}

pub(crate) mod human_duration_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => super::human_duration::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|raw| {
            humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
