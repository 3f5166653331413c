#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod scenario;
#[doc(hidden)]
pub mod transaction;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;

mod check;
mod error;

pub(crate) mod executor;
pub(crate) mod measurement;
pub(crate) mod registry;
pub(crate) mod schedule;
pub(crate) mod thresholds;
pub(crate) mod timer;
pub(crate) mod window;

#[doc(hidden)]
pub use surge_core as core;

pub use check::check;
pub use error::ScenarioError;
pub use scenario::{ConfigurableScenario, Scenario, ScenarioResult};
pub use surge_core::{
    ConfigError, RunStatistics, ScenarioConfig, Stage, Threshold, ThresholdSpec,
    THRESHOLDS_FAILED_EXIT_CODE,
};
pub use surge_macros::{scenario, transaction};

pub mod prelude {
    pub use crate::check;
    pub use crate::scenario::ConfigurableScenario;
    pub use surge_core::{RunStatistics, ScenarioConfig, Stage, ThresholdSpec};
    pub use surge_macros::{scenario, transaction};
}
