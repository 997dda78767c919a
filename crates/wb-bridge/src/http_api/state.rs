use std::sync::Arc;
use std::time::Instant;

use wb_core::workspace::Workspace;
use wb_exec::{ExecutionSupervisor, Reporter};

/// Shared application state for all HTTP handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub workspace: Arc<Workspace>,
    pub supervisor: ExecutionSupervisor,
    pub reporter: Reporter,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(workspace: Arc<Workspace>, supervisor: ExecutionSupervisor) -> Self {
        let reporter = supervisor.reporter();
        Self {
            workspace,
            supervisor,
            reporter,
            start_time: Instant::now(),
        }
    }
}
