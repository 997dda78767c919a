use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wb_core::config::ExecConfig;

use crate::error::LaunchError;
use crate::output::{pump, OutputBuffer};
use crate::types::{ExitState, OutputStream};

/// How long to wait for the output pumps after the child has been reaped.
/// Descendants that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// Owner's view of a launched child process.
///
/// The child itself lives in a monitor task; the handle talks to it through a
/// oneshot kill request and a watch channel carrying the exit state. Dropping
/// the handle while the process runs kills it.
pub struct ProcessHandle {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    output: Arc<OutputBuffer>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ExitState>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn output(&self) -> &Arc<OutputBuffer> {
        &self.output
    }

    /// `true` until the exit state has been published.
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    pub fn exit_state(&self) -> Option<ExitState> {
        self.exit_rx.borrow().clone()
    }

    /// Request immediate termination of the process and its group.
    ///
    /// Returns `true` only for the call that actually delivered the request;
    /// later calls, and calls after exit, return `false`.
    pub fn kill(&self) -> bool {
        let tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(|e| {
                warn!("kill lock was poisoned, recovering");
                e.into_inner()
            })
            .take();
        match tx {
            Some(tx) if self.is_alive() => tx.send(()).is_ok(),
            _ => false,
        }
    }

    /// A receiver that observes the exit state once it is known.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitState>> {
        self.exit_rx.clone()
    }

    /// Wait for the process to exit. `None` only if the monitor task died
    /// without publishing a state.
    pub async fn wait(&self) -> Option<ExitState> {
        wait_exit(self.exit_watch()).await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) async fn wait_exit(mut rx: watch::Receiver<Option<ExitState>>) -> Option<ExitState> {
    match rx.wait_for(Option::is_some).await {
        Ok(state) => state.clone(),
        Err(_) => None,
    }
}

// ---------------------------------------------------------------------------
// CommandLauncher
// ---------------------------------------------------------------------------

/// Spawns command lines under a host shell.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    shell: String,
    shell_flag: String,
    max_output_bytes: usize,
}

impl CommandLauncher {
    pub fn new(shell: impl Into<String>, shell_flag: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            shell: shell.into(),
            shell_flag: shell_flag.into(),
            max_output_bytes,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(&config.shell, &config.shell_flag, config.max_output_bytes)
    }

    /// Start `command` with `working_dir` as its current directory.
    ///
    /// The command line is handed to the shell as one argument, unmodified.
    pub async fn launch(&self, working_dir: &Path, command: &str) -> Result<ProcessHandle, LaunchError> {
        check_working_dir(working_dir).await?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.shell_flag)
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a group kill also reaches grandchildren.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

        let output = Arc::new(OutputBuffer::new(self.max_output_bytes));
        let pumps = [
            tokio::spawn(pump(stdout, output.clone(), OutputStream::Stdout)),
            tokio::spawn(pump(stderr, output.clone(), OutputStream::Stderr)),
        ];

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(monitor(child, pid, kill_rx, exit_tx, pumps, output.clone()));

        debug!(?pid, dir = %working_dir.display(), "process launched");

        Ok(ProcessHandle {
            pid,
            started_at: Utc::now(),
            output,
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
        })
    }
}

async fn check_working_dir(path: &Path) -> Result<(), LaunchError> {
    let invalid = |reason: String| LaunchError::InvalidWorkingDir {
        path: PathBuf::from(path),
        reason,
    };
    if !path.is_absolute() {
        return Err(invalid("not an absolute path".into()));
    }
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory".into()));
    }
    Ok(())
}

/// Owns the child until it is reaped, then publishes its exit state.
async fn monitor(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitState>>,
    pumps: [JoinHandle<()>; 2],
    output: Arc<OutputBuffer>,
) {
    // A dropped sender counts as a kill request.
    let (status, killed) = tokio::select! {
        status = child.wait() => {
            // Background jobs the command left behind go with it.
            signal_group(pid);
            (status, false)
        }
        _ = &mut kill_rx => match child.try_wait() {
            Ok(Some(status)) => {
                signal_group(pid);
                (Ok(status), false)
            }
            _ => {
                terminate(&mut child, pid);
                (child.wait().await, true)
            }
        },
    };

    let aborts: Vec<_> = pumps.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, futures::future::join_all(pumps))
        .await
        .is_err()
    {
        debug!(?pid, "output still open after exit, detaching");
        aborts.iter().for_each(|a| a.abort());
    }
    output.close(OutputStream::Stdout);
    output.close(OutputStream::Stderr);

    let state = match status {
        Ok(status) => ExitState {
            code: status.code(),
            signal: exit_signal(&status),
            killed,
            finished_at: Utc::now(),
        },
        Err(e) => {
            warn!(?pid, error = %e, "failed to reap child");
            ExitState {
                code: None,
                signal: None,
                killed,
                finished_at: Utc::now(),
            }
        }
    };
    exit_tx.send_replace(Some(state));
}

/// SIGKILL the whole group, then the child itself as a fallback.
///
/// Only called while the child is unreaped, so its pid (and group id) cannot
/// have been recycled.
fn terminate(child: &mut Child, pid: Option<u32>) {
    signal_group(pid);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill after group kill");
    }
}

/// SIGKILL every process in the child's group. A group id stays reserved
/// while any member is alive; an empty group only yields ESRCH.
fn signal_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: plain syscall with no memory arguments.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
