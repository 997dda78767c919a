use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::StreamWindow;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Registered and the process is alive.
    Running,
    /// Registered but the process has exited or been killed; teardown pending.
    /// Also the terminal state of an explicit stop or shutdown.
    Stopped,
    /// Exited on its own with code 0.
    Completed,
    /// Exited on its own with a non-zero code or by a signal it did not get from us.
    Failed,
    /// Killed because it outlived the execution timeout.
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TeardownReason
// ---------------------------------------------------------------------------

/// Which path removed an execution from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Exited,
    Stopped,
    TimedOut,
    Shutdown,
}

impl TeardownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownReason::Exited => "exited",
            TeardownReason::Stopped => "stopped",
            TeardownReason::TimedOut => "timed_out",
            TeardownReason::Shutdown => "shutdown",
        }
    }
}

// ---------------------------------------------------------------------------
// ExitState
// ---------------------------------------------------------------------------

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitState {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// The process was terminated through its handle.
    pub killed: bool,
    pub finished_at: DateTime<Utc>,
}

impl ExitState {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl FromStr for OutputStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(OutputStream::Stdout),
            "stderr" => Ok(OutputStream::Stderr),
            other => Err(format!("unknown stream: {other}")),
        }
    }
}

/// A slice of one output stream starting at an absolute byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub stream: OutputStream,
    /// Offset the returned data actually starts at. Larger than the requested
    /// offset when the requested bytes were already discarded.
    pub offset: u64,
    pub data: String,
    /// Pass this back as `offset` to continue polling.
    pub next_offset: u64,
    pub truncated: bool,
    /// No more output will ever be appended.
    pub finished: bool,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// One line of `list()`: a live execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub command: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

/// Full state of an execution, live or retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub command: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// Terminal snapshot of a torn-down execution, kept in the result store.
///
/// Output is kept as raw byte windows so offsets handed out while the
/// execution was live stay valid after teardown.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub command: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: StreamWindow,
    pub stderr: StreamWindow,
}

impl ExecutionRecord {
    pub fn window(&self, stream: OutputStream) -> &StreamWindow {
        match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        }
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            id: self.id,
            status: self.status,
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            created_at: self.created_at,
            finished_at: Some(self.finished_at),
            pid: None,
            exit_code: self.exit_code,
            signal: self.signal,
            stdout: self.stdout.text(),
            stderr: self.stderr.text(),
            truncated: self.stdout.is_truncated() || self.stderr.is_truncated(),
        }
    }
}

/// Result of `stop()`. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StopOutcome {
    /// This call tore the execution down.
    Stopped { status: ExecutionStatus },
    /// Nothing registered under the id; already gone or never issued.
    NotFound,
}

impl StopOutcome {
    pub fn stopped(&self) -> bool {
        matches!(self, StopOutcome::Stopped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_wire_name() {
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "timed_out");
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn stream_parses() {
        assert_eq!("stderr".parse::<OutputStream>(), Ok(OutputStream::Stderr));
        assert!("stdin".parse::<OutputStream>().is_err());
    }
}
