use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use wb_core::workspace::ProjectResolver;
use wb_exec::{ExecutionSnapshot, ExecutionSummary, OutputChunk};

use super::state::ApiState;
use super::types::{OutputQuery, RunRequest, RunResponse, StopResponse};
use crate::api_error::ApiError;

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid execution id: {raw}")))
}

/// POST /api/projects/{id}/run -- start a command; returns at once with its id.
pub(crate) async fn run_command(
    State(state): State<Arc<ApiState>>,
    Path(project): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    if req.command.trim().is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }
    let working_dir = state
        .workspace
        .resolve_working_dir(&project, req.path.as_deref())
        .await?;
    let id = state.supervisor.start(working_dir, &req.command).await?;
    info!(%id, project = %project, "run accepted");
    Ok((StatusCode::ACCEPTED, Json(RunResponse { id })))
}

/// GET /api/executions -- live executions.
pub(crate) async fn list_executions(
    State(state): State<Arc<ApiState>>,
) -> Json<Vec<ExecutionSummary>> {
    Json(state.reporter.list())
}

/// GET /api/executions/{id}
pub(crate) async fn get_execution(
    State(state): State<Arc<ApiState>>,
    Path(raw): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ApiError> {
    let id = parse_id(&raw)?;
    state
        .reporter
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))
}

/// GET /api/executions/{id}/output?stream=&offset= -- incremental output.
pub(crate) async fn get_output(
    State(state): State<Arc<ApiState>>,
    Path(raw): Path<String>,
    Query(q): Query<OutputQuery>,
) -> Result<Json<OutputChunk>, ApiError> {
    let id = parse_id(&raw)?;
    state
        .reporter
        .output_since(&id, q.stream, q.offset)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))
}

/// POST /api/executions/{id}/stop and DELETE /api/executions/{id}.
///
/// Stopping an unknown or finished execution succeeds with `stopped: false`.
pub(crate) async fn stop_execution(
    State(state): State<Arc<ApiState>>,
    Path(raw): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let id = parse_id(&raw)?;
    let outcome = state.supervisor.stop(&id).await;
    Ok(Json(StopResponse {
        ok: true,
        stopped: outcome.stopped(),
    }))
}
