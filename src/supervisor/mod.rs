//! The process supervisor: one dev-server process per attempt, attempts in
//! sequence until the server is ready or the run fails for good.

mod result;
mod settings;
mod tail;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::error::SupervisorError;
use crate::policy::RetryState;
use crate::port::find_available_port;
use crate::process::{OutputLine, ProcessHandle, StreamKind};
use crate::remediation::{CommandRemediator, RemediationOutcome, Remediator};
use crate::resources::{log_snapshot, ResourceProbe, ResourceThresholds, SystemProbe};
use crate::rules::{Classification, RuleSet};

pub use result::{AttemptReport, FailureReason, SupervisionReport, SupervisionResult};
pub use settings::SupervisionSettings;
pub use tail::{read_file_tail, LineTail};

/// Stderr lines kept for the failure report.
pub const STDERR_TAIL_LINES: usize = 200;
/// Auxiliary log lines dumped on final failure.
pub const AUX_LOG_TAIL_LINES: usize = 50;

pub struct Supervisor<R> {
    settings: SupervisionSettings,
    rules: RuleSet,
    remediator: R,
    probe: Arc<dyn ResourceProbe>,
}

impl Supervisor<CommandRemediator> {
    /// Supervisor wired to the real system: config rules, a warmed
    /// [`SystemProbe`] and the command-running remediator.
    pub async fn from_config(config: &Config) -> Result<Self, SupervisorError> {
        let rules = RuleSet::from_config(&config.rules, config.builtin_rules)?;
        config.validate()?;

        let probe: Arc<dyn ResourceProbe> =
            Arc::new(SystemProbe::warmed(&config.resources.disk_path).await);
        let remediator = CommandRemediator::new(
            config.remediation.clone(),
            config.command.working_dir.clone(),
            Arc::clone(&probe),
            ResourceThresholds::from(&config.resources),
        );
        Ok(Self::new(
            SupervisionSettings::from_config(config),
            rules,
            remediator,
            probe,
        ))
    }
}

impl<R: Remediator> Supervisor<R> {
    pub fn new(
        settings: SupervisionSettings,
        rules: RuleSet,
        remediator: R,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            settings,
            rules,
            remediator,
            probe,
        }
    }

    pub fn remediator(&self) -> &R {
        &self.remediator
    }

    /// Run attempts until the server is ready or the run fails.
    ///
    /// The result in the returned report is always `Ready` or `Failed`.
    pub async fn supervise(&self) -> SupervisionReport {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("supervise", run_id = %run_id);
        self.supervise_inner(run_id).instrument(span).await
    }

    async fn supervise_inner(&self, run_id: String) -> SupervisionReport {
        tracing::info!(
            command = %self.settings.command.display(),
            ports = %format!("{}-{}", self.settings.ports.start, self.settings.ports.end),
            "Starting supervision"
        );
        log_snapshot(&self.probe.sample(), &self.settings.thresholds);

        let mut retry = RetryState::new(self.settings.max_attempts, self.settings.backoff);
        let mut tail = LineTail::new(STDERR_TAIL_LINES);
        let mut history = Vec::new();
        let mut last = None;

        let result = loop {
            let Some(attempt) = retry.begin() else {
                break SupervisionResult::Failed(FailureReason::RetriesExhausted {
                    attempts: retry.attempts(),
                    last: Box::new(last.take().unwrap_or(SupervisionResult::TimedOut)),
                });
            };

            tracing::info!("Attempt {}/{}", attempt, retry.max_attempts());
            let report = self.run_attempt(attempt, &mut tail).await;
            let result = report.result.clone();
            history.push(report);

            if !result.is_retryable() {
                break result;
            }

            tracing::warn!("Attempt {} {}", attempt, result);
            if !retry.is_exhausted() {
                let delay = retry.next_delay();
                tracing::info!(
                    "Retrying in {}s ({} attempts left)",
                    delay.as_secs_f32(),
                    retry.remaining()
                );
                sleep(delay).await;
            }
            last = Some(result);
        };

        if result.ready_value().is_none() {
            self.log_failure(&result, &tail).await;
        }

        SupervisionReport {
            run_id,
            result,
            attempts: retry.attempts(),
            history,
            stderr_tail: tail.to_vec(),
        }
    }

    /// One attempt: pick a port, launch, watch output, release the process.
    pub async fn run_attempt(&self, attempt: u32, tail: &mut LineTail) -> AttemptReport {
        let ports = self.settings.ports;
        let port = match find_available_port(ports).await {
            Ok(port) => port,
            Err(e) => {
                tracing::error!("{}", e);
                return AttemptReport {
                    attempt,
                    port: None,
                    pid: None,
                    result: SupervisionResult::Failed(FailureReason::NoAvailablePort {
                        start: ports.start,
                        end: ports.end,
                    }),
                    exit: None,
                };
            }
        };
        tracing::info!("Port {} selected", port);

        let spec = self.settings.command.for_port(port);
        let mut handle = match ProcessHandle::spawn(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("{}", e);
                return AttemptReport {
                    attempt,
                    port: Some(port),
                    pid: None,
                    result: SupervisionResult::Failed(FailureReason::Spawn {
                        program: spec.program.clone(),
                        message: e.to_string(),
                    }),
                    exit: None,
                };
            }
        };
        let pid = handle.pid();
        tracing::info!(pid = ?pid, "Launched {}", spec.display());

        let result = self.watch(&mut handle, tail).await;
        let exit = handle.terminate(self.settings.termination_grace).await;
        tracing::debug!(pid = ?pid, "Process released: {}", exit);

        AttemptReport {
            attempt,
            port: Some(port),
            pid,
            result,
            exit: Some(exit),
        }
    }

    async fn watch(&self, handle: &mut ProcessHandle, tail: &mut LineTail) -> SupervisionResult {
        let deadline = Instant::now() + self.settings.attempt_timeout;
        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = handle.next_line() => {
                    let Some(line) = line else {
                        return self.reap(handle, deadline).await;
                    };
                    if let Some(result) = self.handle_line(line, tail).await {
                        return result;
                    }
                }
                _ = sleep_until(deadline) => {
                    tracing::warn!(
                        "No ready signal within {}s",
                        self.settings.attempt_timeout.as_secs_f32()
                    );
                    return SupervisionResult::TimedOut;
                }
                _ = heartbeat.tick() => {
                    log_snapshot(&self.probe.sample(), &self.settings.thresholds);
                }
            }
        }
    }

    async fn handle_line(&self, line: OutputLine, tail: &mut LineTail) -> Option<SupervisionResult> {
        match line.stream {
            StreamKind::Stdout => {
                tracing::info!(target: "bundler", stream = %line.stream, "{}", line.text)
            }
            StreamKind::Stderr => {
                tracing::warn!(target: "bundler", stream = %line.stream, "{}", line.text);
                tail.push(line.text.clone());
            }
        }

        match self.rules.classify(&line.text) {
            Classification::Ready(value) => {
                tracing::info!("Dev server ready at {}", value);
                Some(SupervisionResult::Ready(value))
            }
            Classification::Remediable(kind) => {
                tracing::warn!(%kind, "Recoverable error detected, remediating");
                match self.remediator.remediate(kind).await {
                    RemediationOutcome::Restart => Some(SupervisionResult::NeedsRestart(kind)),
                    RemediationOutcome::Failed(message) => {
                        tracing::warn!(%kind, "Remediation failed: {}", message);
                        None
                    }
                    RemediationOutcome::Escalate(message) => {
                        tracing::error!(%kind, "Cannot recover: {}", message);
                        Some(SupervisionResult::Failed(FailureReason::Fatal {
                            kind: kind.to_string(),
                            line: line.text,
                        }))
                    }
                }
            }
            Classification::Fatal(kind) => {
                tracing::error!(%kind, "Fatal error in dev server output");
                Some(SupervisionResult::Failed(FailureReason::Fatal {
                    kind,
                    line: line.text,
                }))
            }
            Classification::Informational(Some(label)) => {
                tracing::debug!(%label, "Progress");
                None
            }
            Classification::Informational(None) => None,
        }
    }

    /// Both streams are closed; wait for the exit status within the deadline.
    async fn reap(&self, handle: &mut ProcessHandle, deadline: Instant) -> SupervisionResult {
        match timeout_at(deadline, handle.wait()).await {
            Ok(Ok(exit)) => {
                tracing::warn!("Dev server {} before becoming ready", exit);
                SupervisionResult::Failed(FailureReason::NoReadySignal { exit })
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to reap dev server: {}", e);
                SupervisionResult::Failed(FailureReason::NoReadySignal {
                    exit: handle.status(),
                })
            }
            Err(_) => SupervisionResult::TimedOut,
        }
    }

    async fn log_failure(&self, result: &SupervisionResult, tail: &LineTail) {
        tracing::error!("Dev server did not become ready: {}", result);

        let health = log_snapshot(&self.probe.sample(), &self.settings.thresholds);
        if !health.healthy {
            tracing::error!("System resources are insufficient for the bundler");
        }

        if !tail.is_empty() {
            tracing::error!("Last stderr output:");
            for line in tail.to_vec() {
                tracing::error!(target: "bundler", "{}", line);
            }
        }

        let Some(path) = &self.settings.aux_log else {
            return;
        };
        match read_file_tail(path, AUX_LOG_TAIL_LINES).await {
            Ok(lines) => {
                tracing::error!("Last lines of {}:", path.display());
                for line in lines {
                    tracing::error!(target: "bundler", "{}", line);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not read {}: {}", path.display(), e),
        }
    }
}
