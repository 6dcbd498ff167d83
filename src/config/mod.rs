//! Configuration loading and validation.

mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{
    CommandConfig, Config, EnvironmentConfig, LoggingConfig, PortsConfig, RemediationConfig,
    ResourcesConfig, RetryConfig, RuleConfig, TimeoutsConfig,
};
