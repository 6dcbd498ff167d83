//! Up-front checks for the usual reasons a dev server fails to start.

use std::time::Duration;

use serde::Serialize;

use crate::config::Config;
use crate::port::is_port_in_use;
use crate::remediation::run_command;
use crate::resources::{ResourceProbe, ResourceSnapshot, ResourceThresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    Port,
    Dependencies,
    Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub check: Check,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub issues: Vec<Issue>,
    pub resources: ResourceSnapshot,
}

impl DiagnosticReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

pub async fn diagnose(config: &Config, probe: &dyn ResourceProbe) -> DiagnosticReport {
    let mut issues = Vec::new();

    let port = config.ports.start;
    if is_port_in_use(port).await {
        issues.push(Issue {
            check: Check::Port,
            message: format!("Port {} is already in use", port),
        });
    }

    let check = &config.remediation.dependency_check_command;
    if !check.is_empty() {
        let limit = Duration::from_secs(config.remediation.command_timeout_seconds);
        if let Err(e) = run_command(check, config.command.working_dir.as_deref(), limit).await {
            issues.push(Issue {
                check: Check::Dependencies,
                message: format!("Dependency check failed: {}", e),
            });
        }
    }

    let resources = probe.sample();
    let health = resources.assess(&ResourceThresholds::from(&config.resources));
    issues.extend(health.warnings.into_iter().map(|message| Issue {
        check: Check::Resources,
        message,
    }));

    if issues.is_empty() {
        tracing::info!("No common issues found");
    }
    for issue in &issues {
        tracing::warn!(check = ?issue.check, "{}", issue.message);
    }

    DiagnosticReport { issues, resources }
}
