use surge_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid scenario configuration: {0}")]
    Config(#[from] ConfigError),
}
