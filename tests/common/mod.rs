//! Shared test utilities: scripted dev servers, fixed probes, fake remediators.

#![allow(dead_code, unused_imports)]

use bundlerwatch::policy::BackoffPolicy;
use bundlerwatch::port::PortRange;
use bundlerwatch::process::CommandSpec;
use bundlerwatch::remediation::{RemediationOutcome, Remediator};
use bundlerwatch::resources::{ResourceProbe, ResourceSnapshot};
use bundlerwatch::rules::{RemediableKind, RuleSet};
use bundlerwatch::{SupervisionSettings, Supervisor};
use parking_lot::Mutex;
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Find an available port for testing.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to free port");
    listener.local_addr().unwrap().port()
}

/// A `sh -c` command standing in for the dev server.
pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", vec!["-c".to_string(), script.to_string()])
}

/// Settings tuned for tests: one free port, short timeouts, near-zero backoff.
pub fn fast_settings(command: CommandSpec) -> SupervisionSettings {
    let mut settings = SupervisionSettings::for_command(command);
    settings.ports = PortRange::single(free_port());
    settings.attempt_timeout = Duration::from_secs(10);
    settings.heartbeat_interval = Duration::from_millis(250);
    settings.max_attempts = 3;
    settings.backoff = BackoffPolicy {
        base: Duration::from_millis(10),
        max: Duration::from_millis(40),
    };
    settings.termination_grace = Duration::from_millis(500);
    settings
}

pub fn supervisor(
    settings: SupervisionSettings,
    remediator: ScriptedRemediator,
) -> Supervisor<ScriptedRemediator> {
    supervisor_with_resources(settings, remediator, Arc::new(FixedProbe::healthy()))
}

pub fn supervisor_with_resources(
    settings: SupervisionSettings,
    remediator: ScriptedRemediator,
    resources: Arc<dyn ResourceProbe>,
) -> Supervisor<ScriptedRemediator> {
    Supervisor::new(settings, RuleSet::builtin().unwrap(), remediator, resources)
}

/// Script that counts its launches in `dir/launches` before running `body`.
///
/// `$n` holds the 1-based launch number inside `body`.
pub fn counting_script(body: &str) -> String {
    format!(
        "n=$(cat launches 2>/dev/null || echo 0); n=$((n+1)); echo $n > launches; {}",
        body
    )
}

pub fn launches(dir: &Path) -> u32 {
    std::fs::read_to_string(dir.join("launches"))
        .map(|s| s.trim().parse().unwrap())
        .unwrap_or(0)
}

/// Write `content` to a config file in a fresh temp dir.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

// -- Fakes --------------------------------------------------------------------

/// Probe returning the same snapshot every time.
pub struct FixedProbe(pub ResourceSnapshot);

impl FixedProbe {
    pub fn healthy() -> Self {
        Self(ResourceSnapshot {
            cpu_percent: 10.0,
            memory_percent: 40.0,
            disk_percent: Some(50.0),
            disk_free_bytes: Some(100 << 30),
        })
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSnapshot {
        self.0
    }
}

/// Healthy snapshots, counting how often it was sampled.
#[derive(Default)]
pub struct CountingProbe {
    samples: AtomicUsize,
}

impl CountingProbe {
    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl ResourceProbe for CountingProbe {
    fn sample(&self) -> ResourceSnapshot {
        self.samples.fetch_add(1, Ordering::SeqCst);
        FixedProbe::healthy().0
    }
}

/// Log output captured from a thread-local subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route this thread's log events into a buffer until the guard drops.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

/// Remediator that always answers the same way and records what it was asked.
pub struct ScriptedRemediator {
    outcome: RemediationOutcome,
    calls: Mutex<Vec<RemediableKind>>,
}

impl ScriptedRemediator {
    pub fn new(outcome: RemediationOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn restarting() -> Self {
        Self::new(RemediationOutcome::Restart)
    }

    pub fn calls(&self) -> Vec<RemediableKind> {
        self.calls.lock().clone()
    }
}

impl Remediator for ScriptedRemediator {
    async fn remediate(&self, kind: RemediableKind) -> RemediationOutcome {
        self.calls.lock().push(kind);
        self.outcome.clone()
    }
}
