//! Supervisor for bundler dev-server processes.
//!
//! Launches the dev server on a free port, watches its output for a ready
//! URL or a known error, remediates what can be fixed and retries with
//! capped exponential backoff.

pub mod config;
pub mod diagnose;
pub mod env;
pub mod error;
pub mod logging;
pub mod policy;
pub mod port;
pub mod process;
pub mod remediation;
pub mod resources;
pub mod rules;
pub mod supervisor;

pub use error::SupervisorError;
pub use supervisor::{SupervisionReport, SupervisionResult, SupervisionSettings, Supervisor};
