use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use wb_bridge::http_api::{api_router, ApiState};
use wb_core::config::Config;
use wb_core::shutdown::{ShutdownGuard, ShutdownSignal};
use wb_core::workspace::Workspace;
use wb_exec::ExecutionSupervisor;

/// How long in-flight HTTP requests get to finish after shutdown.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long background loops get to release their guards.
const LOOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for daemon loop intervals.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// How often expired execution results are pruned (default: 60s).
    pub prune_secs: u64,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self { prune_secs: 60 }
    }
}

/// The workbench server.
///
/// Serves the HTTP API and prunes retained results until the
/// [`ShutdownSignal`] fires, then drains the server and stops every running
/// execution before returning.
pub struct Daemon {
    config: Config,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
    supervisor: ExecutionSupervisor,
    api_state: Arc<ApiState>,
}

impl Daemon {
    /// Build a daemon from config, opening (or creating) the workspace root.
    pub async fn new(config: Config) -> Result<Self> {
        let root = config.workspace.root_path();
        let workspace = Workspace::open(&root)
            .await
            .with_context(|| format!("failed to open workspace at {}", root.display()))?;
        let supervisor = ExecutionSupervisor::from_config(&config.exec);
        let api_state = Arc::new(ApiState::new(Arc::new(workspace), supervisor.clone()));
        Ok(Self {
            config,
            intervals: DaemonIntervals::default(),
            shutdown: ShutdownSignal::new(),
            supervisor,
            api_state,
        })
    }

    /// Override the default loop intervals.
    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Send the shutdown signal.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.api_state
    }

    pub fn supervisor(&self) -> &ExecutionSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind to the configured address and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.config.daemon.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// Run on a pre-bound listener (e.g. port 0 in tests) until shutdown.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = api_router(self.api_state.clone(), self.config.daemon.max_body_bytes);
        let bind_addr = listener.local_addr()?;

        let mut server_stop = self.shutdown.clone();
        let mut api_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_stop.wait().await });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });
        info!(%bind_addr, root = %self.api_state.workspace.root().display(), "API server listening");

        Self::run_loops(
            self.supervisor.clone(),
            self.intervals.clone(),
            self.shutdown.clone(),
            self.shutdown.guard(),
        )
        .await;

        if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut api_handle)
            .await
            .is_err()
        {
            warn!("API server did not drain in time, aborting");
            api_handle.abort();
        }

        let stopped = self.supervisor.shutdown().await;
        info!(stopped, "executions stopped");

        self.shutdown.wait_for_drain(LOOP_DRAIN_TIMEOUT).await;
        info!("daemon stopped");
        Ok(())
    }

    /// Periodic maintenance until shutdown fires.
    async fn run_loops(
        supervisor: ExecutionSupervisor,
        intervals: DaemonIntervals,
        mut shutdown: ShutdownSignal,
        _guard: ShutdownGuard,
    ) {
        let mut prune_interval =
            tokio::time::interval(Duration::from_secs(intervals.prune_secs.max(1)));
        // Consume the first immediate tick.
        prune_interval.tick().await;

        loop {
            tokio::select! {
                _ = prune_interval.tick() => {
                    let pruned = supervisor.prune_results();
                    if pruned > 0 {
                        debug!(pruned, "pruned expired execution results");
                    }
                }
                _ = shutdown.wait() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }
}
