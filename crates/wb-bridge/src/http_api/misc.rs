use std::sync::Arc;

use axum::{extract::State, Json};

use super::state::ApiState;
use super::types::StatusResponse;

/// GET /api/status -- server version, uptime and execution counts.
pub(crate) async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        running_executions: state.reporter.live_count(),
        retained_results: state.reporter.retained_count(),
        shutting_down: state.supervisor.is_shutting_down(),
    })
}
