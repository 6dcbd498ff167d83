use std::fmt;

use serde::Serialize;

use crate::process::TerminationStatus;
use crate::rules::RemediableKind;

/// Terminal outcome of one attempt, or of a whole run.
///
/// A finished run only ever reports `Ready` or `Failed`; `TimedOut` and
/// `NeedsRestart` are attempt-level results the retry loop consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SupervisionResult {
    Ready(String),
    TimedOut,
    Failed(FailureReason),
    NeedsRestart(RemediableKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    NoAvailablePort {
        start: u16,
        end: u16,
    },
    /// Both streams closed and the process exited without a ready line.
    NoReadySignal {
        exit: TerminationStatus,
    },
    Fatal {
        kind: String,
        line: String,
    },
    Spawn {
        program: String,
        message: String,
    },
    RetriesExhausted {
        attempts: u32,
        last: Box<SupervisionResult>,
    },
}

impl SupervisionResult {
    /// Whether another attempt may fix this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupervisionResult::TimedOut
                | SupervisionResult::NeedsRestart(_)
                | SupervisionResult::Failed(FailureReason::NoReadySignal { .. })
        )
    }

    pub fn ready_value(&self) -> Option<&str> {
        match self {
            SupervisionResult::Ready(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for SupervisionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisionResult::Ready(value) => write!(f, "ready at {}", value),
            SupervisionResult::TimedOut => f.write_str("timed out waiting for a ready signal"),
            SupervisionResult::Failed(reason) => write!(f, "failed: {}", reason),
            SupervisionResult::NeedsRestart(kind) => write!(f, "restart after {}", kind),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoAvailablePort { start, end } => {
                write!(f, "no available port between {} and {}", start, end)
            }
            FailureReason::NoReadySignal { exit } => {
                write!(f, "process {} without a ready signal", exit)
            }
            FailureReason::Fatal { kind, line } => write!(f, "{}: {}", kind, line),
            FailureReason::Spawn { program, message } => {
                write!(f, "could not launch '{}': {}", program, message)
            }
            FailureReason::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {} attempts (last: {})", attempts, last)
            }
        }
    }
}

/// What happened during a single attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub attempt: u32,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub result: SupervisionResult,
    /// Status of the released process; `None` when nothing was launched.
    pub exit: Option<TerminationStatus>,
}

/// Final report of a supervision run.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisionReport {
    pub run_id: String,
    pub result: SupervisionResult,
    /// Processes launched (or launch attempts made).
    pub attempts: u32,
    pub history: Vec<AttemptReport>,
    pub stderr_tail: Vec<String>,
}

impl SupervisionReport {
    pub fn is_ready(&self) -> bool {
        self.result.ready_value().is_some()
    }
}
