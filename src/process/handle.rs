use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::SupervisorError;
use crate::process::command::CommandSpec;

const LINE_QUEUE_SIZE: usize = 256;

/// Which standard stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// One line of child output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TerminationStatus {
    Running,
    Exited { code: i32 },
    Killed,
}

impl TerminationStatus {
    fn from_exit(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => TerminationStatus::Exited { code },
            None => TerminationStatus::Killed,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TerminationStatus::Running)
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationStatus::Running => f.write_str("running"),
            TerminationStatus::Exited { code } => write!(f, "exited with code {}", code),
            TerminationStatus::Killed => f.write_str("killed by signal"),
        }
    }
}

/// Exclusive ownership of one child process and its output readers.
///
/// stdout and stderr are drained by two reader tasks into a single queue.
/// Lines keep their order within a stream; no order is promised across
/// streams. Dropping the handle aborts the readers and kills the process
/// group if the child is still running.
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<OutputLine>,
    /// Held open so CLIs that quit on stdin EOF keep running.
    stdin: Option<ChildStdin>,
    readers: Vec<JoinHandle<()>>,
    status: TerminationStatus,
}

impl ProcessHandle {
    pub fn spawn(spec: &CommandSpec) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin_piped {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so the bundler's node workers die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(LINE_QUEUE_SIZE);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tx));
        }

        Ok(Self {
            pid: child.id(),
            stdin: child.stdin.take(),
            child,
            lines: rx,
            readers,
            status: TerminationStatus::Running,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> TerminationStatus {
        self.status
    }

    /// Next line from either stream; `None` once both reached end-of-stream.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<TerminationStatus> {
        if self.status.is_running() {
            let status = self.child.wait().await?;
            self.status = TerminationStatus::from_exit(status);
        }
        Ok(self.status)
    }

    /// Stop the process: SIGTERM to the group, then SIGKILL after `grace`.
    ///
    /// Returns once the leader has been reaped.
    pub async fn terminate(&mut self, grace: Duration) -> TerminationStatus {
        drop(self.stdin.take());
        if !self.status.is_running() {
            // The leader is reaped but its workers may still hold the group.
            self.signal_group(true);
            return self.status;
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            self.status = TerminationStatus::from_exit(status);
            self.signal_group(true);
            return self.status;
        }

        self.signal_group(false);
        self.status = match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => TerminationStatus::from_exit(status),
            _ => {
                tracing::warn!(
                    pid = ?self.pid,
                    "Process ignored SIGTERM for {:?}, killing",
                    grace
                );
                self.signal_group(true);
                let _ = self.child.start_kill();
                match self.child.wait().await {
                    Ok(status) => TerminationStatus::from_exit(status),
                    Err(_) => TerminationStatus::Killed,
                }
            }
        };
        // Leftover group members (bundler workers) go too.
        self.signal_group(true);
        self.status
    }

    #[cfg(unix)]
    fn signal_group(&mut self, force: bool) {
        let Some(pid) = self.pid else {
            return;
        };
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: kill(2) has no memory-safety preconditions. A negative pid
        // addresses the process group created at spawn time.
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _force: bool) {
        let _ = self.child.start_kill();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if self.status.is_running() {
            self.signal_group(true);
        }
    }
}

fn spawn_reader<R>(source: R, stream: StreamKind, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(|c| c == '\n' || c == '\r')
                        .to_string();
                    if tx.send(OutputLine { stream, text }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(%stream, "Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}
