use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::env::EnvSet;
use crate::policy::BackoffPolicy;
use crate::port::PortRange;
use crate::process::CommandSpec;
use crate::resources::ResourceThresholds;

/// Everything one supervision run needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct SupervisionSettings {
    /// Command template; `{port}` is substituted per attempt.
    pub command: CommandSpec,
    pub ports: PortRange,
    pub attempt_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub termination_grace: Duration,
    /// Bundler-side log file dumped on final failure.
    pub aux_log: Option<PathBuf>,
    pub thresholds: ResourceThresholds,
}

impl SupervisionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: CommandSpec::from_config(config),
            ports: PortRange::from(&config.ports),
            attempt_timeout: Duration::from_secs(config.timeouts.attempt_timeout_seconds),
            heartbeat_interval: Duration::from_secs(config.timeouts.heartbeat_seconds),
            max_attempts: config.retry.max_attempts,
            backoff: BackoffPolicy::from(&config.retry),
            termination_grace: Duration::from_millis(config.timeouts.termination_grace_ms),
            aux_log: config.logging.aux_log_file.clone(),
            thresholds: ResourceThresholds::from(&config.resources),
        }
    }

    /// Default settings around a custom command.
    ///
    /// The default environment overrides still apply; variables set on
    /// `command` win over them.
    pub fn for_command(mut command: CommandSpec) -> Self {
        let defaults = Self::from_config(&Config::default());
        command.env = EnvSet::new()
            .with_extra(defaults.command.env.clone())
            .with_extra(command.env)
            .build();
        Self { command, ..defaults }
    }
}
