//! HTTP API error types.
//!
//! Every handler error becomes a JSON body of the form `{"error": "..."}`
//! with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use wb_core::workspace::WorkspaceError;
use wb_exec::LaunchError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was understood but cannot be carried out as given.
    #[error("unprocessable: {0}")]
    Unprocessable(String),

    /// Server state (capacity, shutdown) prevents the request right now.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        let msg = err.to_string();
        match err {
            WorkspaceError::InvalidProjectName(_)
            | WorkspaceError::PathEscapesProject(_)
            | WorkspaceError::NotADirectory(_) => ApiError::BadRequest(msg),
            WorkspaceError::ProjectNotFound(_) | WorkspaceError::NotFound(_) => {
                ApiError::NotFound(msg)
            }
            WorkspaceError::ProjectExists(_) => ApiError::Conflict(msg),
            WorkspaceError::Io(_) => ApiError::InternalError(msg),
        }
    }
}

impl From<LaunchError> for ApiError {
    fn from(err: LaunchError) -> Self {
        let msg = err.to_string();
        match err {
            LaunchError::AtCapacity { .. } | LaunchError::ShuttingDown => {
                ApiError::ServiceUnavailable(msg)
            }
            LaunchError::InvalidWorkingDir { .. } => ApiError::Unprocessable(msg),
            LaunchError::Spawn(_) | LaunchError::MissingPipe(_) => ApiError::InternalError(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoResponse implementation
// ---------------------------------------------------------------------------

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unprocessable(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
            ApiError::InternalError(msg) => {
                error!(error = %msg, "request failed");
                msg
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn not_found_response() {
        let response = ApiError::NotFound("execution not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "execution not found");
    }

    #[tokio::test]
    async fn workspace_errors_map_to_status() {
        let cases = [
            (WorkspaceError::InvalidProjectName("x/y".into()), StatusCode::BAD_REQUEST),
            (WorkspaceError::PathEscapesProject("../x".into()), StatusCode::BAD_REQUEST),
            (WorkspaceError::ProjectNotFound("p".into()), StatusCode::NOT_FOUND),
            (WorkspaceError::ProjectExists("p".into()), StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn launch_errors_map_to_status() {
        let busy = ApiError::from(LaunchError::AtCapacity { max: 4 }).into_response();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_json(busy).await["error"]
            .as_str()
            .unwrap()
            .contains("limit"));

        let closing = ApiError::from(LaunchError::ShuttingDown);
        assert_eq!(closing.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let bad_dir = ApiError::from(LaunchError::InvalidWorkingDir {
            path: "/nope".into(),
            reason: "missing".into(),
        });
        assert_eq!(bad_dir.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
