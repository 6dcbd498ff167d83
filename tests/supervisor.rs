//! End-to-end supervision against scripted `sh` dev servers.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bundlerwatch::port::PortRange;
use bundlerwatch::resources::ResourceProbe;
use bundlerwatch::process::TerminationStatus;
use bundlerwatch::remediation::RemediationOutcome;
use bundlerwatch::rules::RemediableKind;
use bundlerwatch::supervisor::{FailureReason, LineTail};
use bundlerwatch::SupervisionResult;
use common::*;

#[tokio::test]
async fn ready_url_on_a_later_line_ends_the_attempt() {
    let script = "echo 'Starting Metro Bundler'; echo 'warming up'; \
                  echo 'Metro waiting on exp://127.0.0.1:19000'; exec sleep 30";
    let sup = supervisor(fast_settings(sh(script)), ScriptedRemediator::restarting());

    let started = Instant::now();
    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Ready("exp://127.0.0.1:19000".to_string())
    );
    assert_eq!(report.attempts, 1);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.history[0].exit, Some(TerminationStatus::Killed));
}

#[tokio::test]
async fn starting_then_url_is_ready_without_retries() {
    let script = "echo 'Starting project at /home/dev/app'; sleep 2; \
                  echo 'exp://192.168.1.5:19000'";
    let sup = supervisor(fast_settings(sh(script)), ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Ready("exp://192.168.1.5:19000".to_string())
    );
    assert_eq!(report.attempts, 1);
    assert!(sup.remediator().calls().is_empty());
}

#[tokio::test]
async fn ready_on_stderr_counts_too() {
    let script = "echo 'exp://127.0.0.1:8081' >&2";
    let sup = supervisor(fast_settings(sh(script)), ScriptedRemediator::restarting());

    let report = sup.supervise().await;
    assert_eq!(report.result.ready_value(), Some("exp://127.0.0.1:8081"));
}

#[tokio::test]
async fn env_overrides_reach_the_dev_server() {
    let script = "echo \"exp://workers:$EXPO_METRO_MAX_WORKERS\"";
    let sup = supervisor(fast_settings(sh(script)), ScriptedRemediator::restarting());

    let report = sup.supervise().await;
    assert_eq!(report.result.ready_value(), Some("exp://workers:2"));
}

#[tokio::test]
async fn exit_without_ready_line_is_no_ready_signal() {
    let sup = supervisor(
        fast_settings(sh("echo 'nothing useful'; exit 3")),
        ScriptedRemediator::restarting(),
    );

    let report = sup.run_attempt(1, &mut LineTail::new(10)).await;
    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::NoReadySignal {
            exit: TerminationStatus::Exited { code: 3 }
        })
    );
    assert!(report.pid.is_some());
}

#[tokio::test]
async fn no_ready_signal_is_retried_until_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = fast_settings(sh(&counting_script("exit 1")).with_working_dir(dir.path()));
    settings.max_attempts = 2;
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::RetriesExhausted {
            attempts: 2,
            last: Box::new(SupervisionResult::Failed(FailureReason::NoReadySignal {
                exit: TerminationStatus::Exited { code: 1 }
            })),
        })
    );
    assert_eq!(launches(dir.path()), 2);
}

#[tokio::test]
async fn timeout_terminates_the_process() {
    let mut settings = fast_settings(sh("echo 'Starting project'; exec sleep 30"));
    settings.attempt_timeout = Duration::from_millis(500);
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let started = Instant::now();
    let report = sup.run_attempt(1, &mut LineTail::new(10)).await;

    assert_eq!(report.result, SupervisionResult::TimedOut);
    assert_eq!(report.exit, Some(TerminationStatus::Killed));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn remediation_restarts_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let script = counting_script(
        "if [ $n -eq 1 ]; then echo \"Error: Cannot find module 'expo'\" >&2; exec sleep 30; \
         else echo 'exp://127.0.0.1:19000'; fi",
    );
    let settings = fast_settings(sh(&script).with_working_dir(dir.path()));
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(report.result.ready_value(), Some("exp://127.0.0.1:19000"));
    assert_eq!(report.attempts, 2);
    assert_eq!(
        report.history[0].result,
        SupervisionResult::NeedsRestart(RemediableKind::ModuleNotFound)
    );
    assert_eq!(sup.remediator().calls(), vec![RemediableKind::ModuleNotFound]);
    assert_eq!(launches(dir.path()), 2);
}

#[tokio::test]
async fn repeated_remediable_errors_exhaust_retries() {
    let dir = tempfile::tempdir().unwrap();
    let script = counting_script(
        "echo 'Error: ENOSPC: System limit for number of file watchers reached'; exec sleep 30",
    );
    let settings = fast_settings(sh(&script).with_working_dir(dir.path()));
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::RetriesExhausted {
            attempts: 3,
            last: Box::new(SupervisionResult::NeedsRestart(
                RemediableKind::FileWatcherLimitExceeded
            )),
        })
    );
    assert_eq!(report.attempts, 3);
    assert_eq!(sup.remediator().calls().len(), 3);
    // No launch past the budget.
    assert_eq!(launches(dir.path()), 3);
}

#[tokio::test]
async fn failed_remediation_keeps_watching() {
    let script = "echo 'Module not found: react-native-web'; echo 'exp://127.0.0.1:19001'";
    let sup = supervisor(
        fast_settings(sh(script)),
        ScriptedRemediator::new(RemediationOutcome::Failed("registry offline".into())),
    );

    let report = sup.supervise().await;

    assert_eq!(report.result.ready_value(), Some("exp://127.0.0.1:19001"));
    assert_eq!(report.attempts, 1);
    assert_eq!(sup.remediator().calls(), vec![RemediableKind::ModuleNotFound]);
}

#[tokio::test]
async fn escalated_remediation_is_fatal() {
    let line = "Metro Bundler process exited with code 1";
    let sup = supervisor(
        fast_settings(sh(&format!("echo '{}'; exec sleep 30", line))),
        ScriptedRemediator::new(RemediationOutcome::Escalate("Memory usage critical".into())),
    );

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::Fatal {
            kind: "bundler-process-exited-unexpectedly".to_string(),
            line: line.to_string(),
        })
    );
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn fatal_line_stops_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let script = counting_script(
        "echo 'FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory' >&2; \
         exec sleep 30",
    );
    let sup = supervisor(
        fast_settings(sh(&script).with_working_dir(dir.path())),
        ScriptedRemediator::restarting(),
    );

    let report = sup.supervise().await;

    match &report.result {
        SupervisionResult::Failed(FailureReason::Fatal { kind, .. }) => {
            assert_eq!(kind, "heap-exhausted")
        }
        other => panic!("expected fatal failure, got {:?}", other),
    }
    assert_eq!(launches(dir.path()), 1);
    assert!(report
        .stderr_tail
        .iter()
        .any(|l| l.contains("JavaScript heap out of memory")));
}

#[tokio::test]
async fn occupied_port_range_fails_without_launching() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();

    let mut settings = fast_settings(sh(&counting_script("exec sleep 30")).with_working_dir(dir.path()));
    settings.ports = PortRange::single(port);
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::NoAvailablePort {
            start: port,
            end: port
        })
    );
    assert_eq!(report.attempts, 1);
    assert!(report.history[0].pid.is_none());
    assert_eq!(launches(dir.path()), 0);
}

#[tokio::test]
async fn missing_program_is_fatal() {
    let settings = fast_settings(bundlerwatch::process::CommandSpec::new(
        "bundlerwatch-missing-dev-server",
        vec![],
    ));
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert!(matches!(
        report.result,
        SupervisionResult::Failed(FailureReason::Spawn { .. })
    ));
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn heartbeat_samples_resources_while_waiting() {
    let mut settings = fast_settings(sh("sleep 0.4; echo 'exp://127.0.0.1:19000'"));
    settings.heartbeat_interval = Duration::from_millis(50);
    let counter = Arc::new(CountingProbe::default());
    let resources: Arc<dyn ResourceProbe> = counter.clone();
    let sup = supervisor_with_resources(settings, ScriptedRemediator::restarting(), resources);

    let report = sup.supervise().await;

    assert!(report.is_ready());
    // One sample at startup, the rest from heartbeats.
    assert!(
        counter.samples() >= 4,
        "only {} resource samples",
        counter.samples()
    );
}

#[tokio::test]
async fn final_failure_dumps_the_aux_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let aux = dir.path().join("metro.log");
    let content: String = (1..=60).map(|i| format!("entry {}\n", i)).collect();
    std::fs::write(&aux, content).unwrap();

    let mut settings = fast_settings(sh("echo 'bundling failed' >&2; exit 1"));
    settings.max_attempts = 1;
    settings.aux_log = Some(aux.clone());
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let (logs, _guard) = capture_logs();
    let report = sup.supervise().await;
    let logs = logs.text();

    assert!(matches!(
        report.result,
        SupervisionResult::Failed(FailureReason::RetriesExhausted { attempts: 1, .. })
    ));
    assert!(logs.contains(&format!("Last lines of {}:", aux.display())));
    assert!(logs.contains("entry 11\n"));
    assert!(logs.contains("entry 60\n"));
    assert!(!logs.contains("entry 10\n"));
    assert!(logs.contains("bundling failed"));
}

#[tokio::test]
async fn repeated_timeouts_exhaust_retries() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings =
        fast_settings(sh(&counting_script("exec sleep 30")).with_working_dir(dir.path()));
    settings.attempt_timeout = Duration::from_millis(300);
    settings.max_attempts = 2;
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let report = sup.supervise().await;

    assert_eq!(
        report.result,
        SupervisionResult::Failed(FailureReason::RetriesExhausted {
            attempts: 2,
            last: Box::new(SupervisionResult::TimedOut),
        })
    );
    assert!(report
        .history
        .iter()
        .all(|a| a.result == SupervisionResult::TimedOut));
    assert_eq!(launches(dir.path()), 2);
}

#[tokio::test]
async fn backoff_delays_elapse_between_attempts() {
    let mut settings = fast_settings(sh("exit 1"));
    settings.max_attempts = 3;
    settings.backoff = bundlerwatch::policy::BackoffPolicy {
        base: Duration::from_millis(200),
        max: Duration::from_secs(1),
    };
    let sup = supervisor(settings, ScriptedRemediator::restarting());

    let started = Instant::now();
    let report = sup.supervise().await;
    let elapsed = started.elapsed();

    assert_eq!(report.attempts, 3);
    // 200ms after the first attempt, 400ms after the second, none after the last.
    assert!(elapsed >= Duration::from_millis(600), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}
