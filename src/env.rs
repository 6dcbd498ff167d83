//! Environment builder: every variable handed to the child in one place.
//!
//! The supervisor never touches its own process environment; the list built
//! here is applied to the spawned command only.

use crate::config::EnvironmentConfig;

/// Builder for environment variables passed to the spawned process.
#[derive(Debug, Clone, Default)]
pub struct EnvSet {
    vars: Vec<(String, String)>,
}

impl EnvSet {
    /// Create an empty environment set.
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Bundler tuning knobs from config.
    pub fn with_overrides(mut self, config: &EnvironmentConfig) -> Self {
        if config.debug {
            self.vars.push(("EXPO_DEBUG".into(), "true".into()));
        }
        if let Some(workers) = config.max_worker_count {
            self.vars
                .push(("EXPO_METRO_MAX_WORKERS".into(), workers.to_string()));
        }
        if let Some(mb) = config.max_old_space_mb {
            self.vars.push((
                "NODE_OPTIONS".into(),
                format!("--max-old-space-size={}", mb),
            ));
        }
        if config.disable_watch_mode {
            self.vars.push(("CI".into(), "1".into()));
        }
        self.vars
            .extend(config.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add arbitrary extra environment variables.
    pub fn with_extra(mut self, extra: Vec<(String, String)>) -> Self {
        self.vars.extend(extra);
        self
    }

    /// Build the final environment variable list.
    ///
    /// Later entries win when a name repeats.
    pub fn build(self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::with_capacity(self.vars.len());
        for (name, value) in self.vars {
            if let Some(existing) = out.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = value;
            } else {
                out.push((name, value));
            }
        }
        out
    }
}
