use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use wb_core::workspace::{FileEntry, Project};

use super::state::ApiState;
use super::types::{CreateProjectRequest, FileContent, PathQuery, WriteFileResponse};
use crate::api_error::ApiError;

/// GET /api/projects
pub(crate) async fn list_projects(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.workspace.list_projects().await?))
}

/// POST /api/projects -- create an empty project directory.
pub(crate) async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state.workspace.create_project(req.name.trim()).await?;
    info!(project = %project.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects/{id}/files?path= -- list one directory.
pub(crate) async fn list_files(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(q): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    Ok(Json(state.workspace.list_dir(&id, &q.path).await?))
}

/// GET /api/projects/{id}/file?path=
pub(crate) async fn read_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(q): Query<PathQuery>,
) -> Result<Json<FileContent>, ApiError> {
    if q.path.is_empty() {
        return Err(ApiError::BadRequest("path is required".into()));
    }
    let content = state.workspace.read_file(&id, &q.path).await?;
    Ok(Json(FileContent {
        path: q.path,
        content,
    }))
}

/// PUT /api/projects/{id}/file -- create or overwrite a file.
pub(crate) async fn write_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<FileContent>,
) -> Result<Json<WriteFileResponse>, ApiError> {
    if req.path.is_empty() {
        return Err(ApiError::BadRequest("path is required".into()));
    }
    let bytes = state.workspace.write_file(&id, &req.path, &req.content).await?;
    Ok(Json(WriteFileResponse {
        path: req.path,
        bytes,
    }))
}
