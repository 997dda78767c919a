use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wb_core::config::ExecConfig;
use wb_telemetry::metrics::global_metrics;

use crate::error::LaunchError;
use crate::history::ResultStore;
use crate::launcher::{wait_exit, CommandLauncher};
use crate::registry::ExecutionRegistry;
use crate::reporter::Reporter;
use crate::types::{
    ExecutionRecord, ExecutionStatus, ExitState, OutputStream, StopOutcome, TeardownReason,
};

// ---------------------------------------------------------------------------
// SupervisorOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Maximum lifetime of one execution.
    pub timeout: Duration,
    /// 0 means unlimited.
    pub max_concurrent: usize,
    /// Upper bound on waiting for a killed process to be reaped.
    pub kill_wait: Duration,
    pub result_ttl: Duration,
    pub max_retained_results: usize,
}

impl SupervisorOptions {
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_concurrent: config.max_concurrent,
            kill_wait: Duration::from_secs(config.kill_wait_secs),
            result_ttl: Duration::from_secs(config.result_ttl_secs),
            max_retained_results: config.max_retained_results,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&ExecConfig::default())
    }
}

// ---------------------------------------------------------------------------
// ExecutionSupervisor
// ---------------------------------------------------------------------------

/// Starts executions and guarantees each one is torn down exactly once:
/// on natural exit, explicit stop, timeout, or shutdown.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct ExecutionSupervisor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    launcher: CommandLauncher,
    registry: Arc<ExecutionRegistry>,
    results: Arc<ResultStore>,
    options: SupervisorOptions,
    /// `None` when `max_concurrent` is 0.
    slots: Option<Arc<Semaphore>>,
    shutting_down: AtomicBool,
}

impl ExecutionSupervisor {
    pub fn new(launcher: CommandLauncher, options: SupervisorOptions) -> Self {
        let results = ResultStore::new(options.max_retained_results, options.result_ttl);
        let slots = (options.max_concurrent > 0).then(|| Arc::new(Semaphore::new(options.max_concurrent)));
        Self {
            inner: Arc::new(Inner {
                launcher,
                registry: Arc::new(ExecutionRegistry::new()),
                results: Arc::new(results),
                options,
                slots,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(
            CommandLauncher::from_config(config),
            SupervisorOptions::from_config(config),
        )
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.inner.registry
    }

    pub fn results(&self) -> &ResultStore {
        &self.inner.results
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.inner.options
    }

    pub fn reporter(&self) -> Reporter {
        Reporter::new(self.inner.registry.clone(), self.inner.results.clone())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Launch `command` in `working_dir` and return its id without waiting
    /// for any output.
    pub async fn start(&self, working_dir: PathBuf, command: &str) -> Result<Uuid, LaunchError> {
        if self.is_shutting_down() {
            return Err(LaunchError::ShuttingDown);
        }
        // The slot is taken before launching so concurrent starts cannot
        // overshoot the limit; it is released when the entry is dropped.
        let slot = match &self.inner.slots {
            Some(slots) => Some(slots.clone().try_acquire_owned().map_err(|_| {
                let max = self.inner.options.max_concurrent;
                warn!(max, "execution limit reached, rejecting start");
                LaunchError::AtCapacity { max }
            })?),
            None => None,
        };

        let handle = self
            .inner
            .launcher
            .launch(&working_dir, command)
            .await
            .inspect_err(|e| warn!(error = %e, dir = %working_dir.display(), "launch failed"))?;
        let pid = handle.pid();
        let exit = handle.exit_watch();
        let id = self
            .inner
            .registry
            .register_with_slot(working_dir, command, handle, slot);

        global_metrics().increment_counter("executions_started_total", &[]);
        global_metrics().add_gauge("executions_running", 1);
        info!(%id, ?pid, command, "execution started");

        let reaper = self.clone();
        tokio::spawn(async move {
            // A killed process is torn down by whoever killed it.
            if wait_exit(exit).await.is_some_and(|state| state.killed) {
                return;
            }
            reaper.finish(id, TeardownReason::Exited).await;
        });

        let sup = self.clone();
        let timeout = self.inner.options.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if sup.inner.registry.contains(&id) {
                warn!(%id, timeout_secs = timeout.as_secs_f64(), "execution timed out");
            }
            sup.finish(id, TeardownReason::TimedOut).await;
        });
        if !self.inner.registry.attach_timer(&id, timer.abort_handle()) {
            timer.abort();
        }

        // A shutdown sweep that began during the launch may not have seen
        // this entry.
        if self.is_shutting_down() {
            self.finish(id, TeardownReason::Shutdown).await;
            return Err(LaunchError::ShuttingDown);
        }

        Ok(id)
    }

    /// Stop an execution. Unknown ids are not an error.
    ///
    /// Teardown runs on its own task, so dropping the returned future after
    /// the kill went out still removes the entry.
    pub async fn stop(&self, id: &Uuid) -> StopOutcome {
        let sup = self.clone();
        let id = *id;
        let torn_down = tokio::spawn(async move { sup.finish(id, TeardownReason::Stopped).await })
            .await
            .unwrap_or_else(|e| {
                warn!(%id, error = %e, "stop task failed");
                None
            });
        match torn_down {
            Some(status) => StopOutcome::Stopped { status },
            None => {
                debug!(%id, "stop: no such execution");
                StopOutcome::NotFound
            }
        }
    }

    /// Refuse new launches and stop every registered execution concurrently.
    /// Returns how many were torn down by the sweep.
    pub async fn shutdown(&self) -> usize {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("supervisor shutdown already in progress");
        }
        let ids = self.inner.registry.ids();
        if ids.is_empty() {
            info!("supervisor shutdown: nothing running");
            return 0;
        }
        info!(count = ids.len(), "supervisor shutdown: stopping executions");
        let results = futures::future::join_all(
            ids.into_iter()
                .map(|id| self.finish(id, TeardownReason::Shutdown)),
        )
        .await;
        let stopped = results.iter().filter(|r| r.is_some()).count();
        info!(stopped, "supervisor shutdown complete");
        stopped
    }

    /// Drop expired retained results.
    pub fn prune_results(&self) -> usize {
        self.inner.results.prune()
    }

    /// Tear down `id` if it is still registered.
    ///
    /// The process is signalled and reaped while the entry is still listed
    /// (as `stopped` once it has exited). Removal then picks the single
    /// winner: only the caller that gets the entry back records a result,
    /// everyone else gets `None`.
    async fn finish(&self, id: Uuid, reason: TeardownReason) -> Option<ExecutionStatus> {
        let exit_rx = {
            let entry = self.inner.registry.lookup(&id)?;
            if reason != TeardownReason::Exited && entry.handle().kill() {
                debug!(%id, reason = reason.as_str(), "kill requested");
            }
            entry.handle().exit_watch()
        };

        let exit = match tokio::time::timeout(self.inner.options.kill_wait, wait_exit(exit_rx)).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(%id, "process not reaped within kill wait");
                None
            }
        };

        let mut entry = self.inner.registry.remove(&id)?;

        // The timer task must not abort itself mid-teardown.
        if reason != TeardownReason::TimedOut {
            if let Some(timer) = entry.take_timer() {
                timer.abort();
            }
        }

        let handle = entry.handle();
        let status = final_status(reason, exit.as_ref());
        let output = handle.output();
        let finished_at = exit.as_ref().map(|e| e.finished_at).unwrap_or_else(Utc::now);

        let record = ExecutionRecord {
            id,
            status,
            command: entry.command.clone(),
            working_dir: entry.working_dir.clone(),
            created_at: entry.created_at,
            finished_at,
            exit_code: exit.as_ref().and_then(|e| e.code),
            signal: exit.as_ref().and_then(|e| e.signal),
            stdout: output.window(OutputStream::Stdout),
            stderr: output.window(OutputStream::Stderr),
        };

        let elapsed = (finished_at - entry.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let metrics = global_metrics();
        metrics.increment_counter("executions_finished_total", &[("status", status.as_str())]);
        metrics.add_gauge("executions_running", -1);
        metrics.record_histogram("execution_duration_seconds", elapsed);

        info!(
            %id,
            status = status.as_str(),
            reason = reason.as_str(),
            exit_code = ?record.exit_code,
            elapsed_secs = elapsed,
            "execution finished"
        );

        self.inner.results.insert(record);
        Some(status)
    }
}

/// A process that exited on its own reports its exit code even when a stop
/// or timeout won the teardown race.
fn final_status(reason: TeardownReason, exit: Option<&ExitState>) -> ExecutionStatus {
    match exit {
        Some(state) if !state.killed => {
            if state.success() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            }
        }
        _ => match reason {
            TeardownReason::TimedOut => ExecutionStatus::TimedOut,
            TeardownReason::Stopped | TeardownReason::Shutdown => ExecutionStatus::Stopped,
            TeardownReason::Exited => ExecutionStatus::Failed,
        },
    }
}
