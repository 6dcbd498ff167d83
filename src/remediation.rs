//! Remediation actions for known recoverable bundler errors.
//!
//! Each [`RemediableKind`] maps to one corrective action. A remediation ends
//! in one of three ways: the supervisor should restart, the action failed
//! (logged, supervision continues), or diagnostics show nothing can be
//! fixed and the run must stop.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::RemediationConfig;
use crate::resources::{ResourceProbe, ResourceThresholds};
use crate::rules::RemediableKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// The fix was applied; relaunch the process.
    Restart,
    /// The fix could not be applied. Not fatal by itself.
    Failed(String),
    /// No chance of self-healing; stop retrying.
    Escalate(String),
}

/// Applies the corrective action for a remediable error.
pub trait Remediator: Send + Sync {
    fn remediate(
        &self,
        kind: RemediableKind,
    ) -> impl Future<Output = RemediationOutcome> + Send;
}

/// Remediator that runs the configured commands on the host.
pub struct CommandRemediator {
    config: RemediationConfig,
    working_dir: Option<PathBuf>,
    probe: Arc<dyn ResourceProbe>,
    thresholds: ResourceThresholds,
}

impl CommandRemediator {
    pub fn new(
        config: RemediationConfig,
        working_dir: Option<PathBuf>,
        probe: Arc<dyn ResourceProbe>,
        thresholds: ResourceThresholds,
    ) -> Self {
        Self {
            config,
            working_dir,
            probe,
            thresholds,
        }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_seconds)
    }

    async fn raise_watch_limit(&self) -> RemediationOutcome {
        let mut raised = false;

        match raise_open_file_limit() {
            Ok(Some((old, new))) => {
                tracing::info!("Raised open file limit from {} to {}", old, new);
                raised = true;
            }
            Ok(None) => tracing::debug!("Open file limit already at its hard limit"),
            Err(e) => tracing::warn!("Could not raise open file limit: {}", e),
        }

        if !self.config.watch_limit_command.is_empty() {
            match run_command(
                &self.config.watch_limit_command,
                self.working_dir.as_deref(),
                self.command_timeout(),
            )
            .await
            {
                Ok(()) => {
                    tracing::info!("File watcher limit raised");
                    raised = true;
                }
                Err(e) => tracing::warn!("Watch limit command failed: {}", e),
            }
        }

        if raised {
            RemediationOutcome::Restart
        } else {
            RemediationOutcome::Failed("could not raise the file watcher limit".to_string())
        }
    }

    async fn install_dependencies(&self) -> RemediationOutcome {
        if self.config.install_command.is_empty() {
            return RemediationOutcome::Failed("no install command configured".to_string());
        }
        tracing::info!("Installing dependencies: {}", self.config.install_command.join(" "));
        match run_command(
            &self.config.install_command,
            self.working_dir.as_deref(),
            self.command_timeout(),
        )
        .await
        {
            Ok(()) => RemediationOutcome::Restart,
            Err(e) => RemediationOutcome::Failed(e),
        }
    }

    async fn reset_cache(&self) -> RemediationOutcome {
        let mut errors = Vec::new();

        for dir in &self.config.cache_dirs {
            let path = resolve_cache_dir(dir, self.working_dir.as_deref());
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => tracing::info!("Removed bundler cache {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("No bundler cache at {}", path.display())
                }
                Err(e) => errors.push(format!("{}: {}", path.display(), e)),
            }
        }

        if !self.config.cache_reset_command.is_empty() {
            if let Err(e) = run_command(
                &self.config.cache_reset_command,
                self.working_dir.as_deref(),
                self.command_timeout(),
            )
            .await
            {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            RemediationOutcome::Restart
        } else {
            RemediationOutcome::Failed(errors.join("; "))
        }
    }

    fn recheck_resources(&self) -> RemediationOutcome {
        let health = self.probe.sample().assess(&self.thresholds);
        if health.healthy {
            RemediationOutcome::Restart
        } else {
            RemediationOutcome::Escalate(format!(
                "insufficient system resources: {}",
                health.warnings.join(", ")
            ))
        }
    }
}

impl Remediator for CommandRemediator {
    async fn remediate(&self, kind: RemediableKind) -> RemediationOutcome {
        match kind {
            RemediableKind::FileWatcherLimitExceeded => self.raise_watch_limit().await,
            RemediableKind::ModuleNotFound => self.install_dependencies().await,
            RemediableKind::BundlerCacheCorrupt => self.reset_cache().await,
            RemediableKind::BundlerProcessExitedUnexpectedly => self.recheck_resources(),
        }
    }
}

/// Resolve `~/` against the home directory and relative paths against the
/// project directory.
pub fn resolve_cache_dir(dir: &str, working_dir: Option<&Path>) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = PathBuf::from(dir);
    match working_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

/// Run a one-shot helper command to completion, bounded by `limit`.
pub async fn run_command(
    argv: &[String],
    working_dir: Option<&Path>,
    limit: Duration,
) -> Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty command".to_string());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let display = argv.join(" ");
    let output = match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("'{}' could not run: {}", display, e)),
        Err(_) => return Err(format!("'{}' timed out after {:?}", display, limit)),
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tracing::debug!(target: "remediation", "{}", line);
    }

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "'{}' failed ({}): {}",
            display,
            output.status,
            stderr.trim()
        ))
    }
}

/// Raise the soft `RLIMIT_NOFILE` to the hard limit.
///
/// Children spawned afterwards inherit the new limit. Returns `None` when
/// the soft limit is already at the hard limit.
#[cfg(unix)]
pub fn raise_open_file_limit() -> std::io::Result<Option<(u64, u64)>> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the rlimit we own.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    if limit.rlim_cur >= limit.rlim_max {
        return Ok(None);
    }
    let old = limit.rlim_cur;
    limit.rlim_cur = limit.rlim_max;
    // SAFETY: setrlimit only reads the rlimit we pass.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(Some((old as u64, limit.rlim_cur as u64)))
}

#[cfg(not(unix))]
pub fn raise_open_file_limit() -> std::io::Result<Option<(u64, u64)>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file limits are not adjustable on this platform",
    ))
}
