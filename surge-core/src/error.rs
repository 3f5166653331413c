use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read options file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed options document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid stage `{0}`, expected `<duration>:<target>`")]
    InvalidStage(String),

    #[error("No workload configured. Provide stages, a duration or iterations.")]
    NoWorkload,

    #[error("At least one VU is required to run {0}")]
    ZeroVus(&'static str),

    #[error("Threshold `{threshold}` uses an aggregation `{metric}` does not support")]
    UnsupportedAggregation { metric: String, threshold: String },

    #[error("Sub-metric thresholds are not supported: `{0}`")]
    SubmetricUnsupported(String),

    #[error("Invalid threshold: {0}")]
    Threshold(#[from] ThresholdParseError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThresholdParseError {
    #[error("empty threshold expression")]
    Empty,

    #[error("unknown aggregation `{0}`")]
    UnknownAggregation(String),

    #[error("percentile `{0}` must be a number between 0 and 100")]
    InvalidPercentile(String),

    #[error("no comparison operator in `{0}`")]
    MissingOperator(String),

    #[error("`{0}` is not a valid threshold value")]
    InvalidValue(String),
}
