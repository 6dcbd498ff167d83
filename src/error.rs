//! Error types for supervisor setup and launch.
//!
//! Run outcomes (ready, timed out, failed) are values in
//! [`crate::supervisor::SupervisionResult`], not errors. The variants here
//! cover what stops the supervisor from running at all.

use thiserror::Error;

use crate::config::ConfigError;
use crate::rules::RuleError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A match rule could not be built
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Every port in the configured range is occupied
    #[error("No available port between {start} and {end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The child process could not be started
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
