// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------
//
// Handlers are grouped by resource; this file owns the router and the
// middleware stack.

mod executions;
mod metrics;
mod misc;
mod projects;
pub mod state;
pub mod types;

pub use state::ApiState;
pub use types::*;

pub use self::router::api_router;

/// Request body cap used when the caller does not pass one.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Router + middleware
// ---------------------------------------------------------------------------

mod router {
    use super::*;
    use axum::{
        extract::DefaultBodyLimit,
        middleware as axum_middleware,
        routing::{get, post},
        Router,
    };
    use std::sync::Arc;
    use tower_http::cors::CorsLayer;
    use tower_http::limit::RequestBodyLimitLayer;

    use wb_telemetry::middleware::metrics_middleware;
    use wb_telemetry::tracing_setup::request_id_middleware;

    /// Build the full API router.
    pub fn api_router(state: Arc<ApiState>, max_body_bytes: usize) -> Router {
        Router::new()
            .route("/api/status", get(misc::get_status))
            // Projects and files
            .route(
                "/api/projects",
                get(projects::list_projects).post(projects::create_project),
            )
            .route("/api/projects/{id}/files", get(projects::list_files))
            .route(
                "/api/projects/{id}/file",
                get(projects::read_file).put(projects::write_file),
            )
            .route("/api/projects/{id}/run", post(executions::run_command))
            // Executions
            .route("/api/executions", get(executions::list_executions))
            .route(
                "/api/executions/{id}",
                get(executions::get_execution).delete(executions::stop_execution),
            )
            .route("/api/executions/{id}/output", get(executions::get_output))
            .route("/api/executions/{id}/stop", post(executions::stop_execution))
            // Metrics
            .route("/api/metrics", get(metrics::get_metrics_prometheus))
            .route("/api/metrics/json", get(metrics::get_metrics_json))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(RequestBodyLimitLayer::new(max_body_bytes))
            .layer(axum_middleware::from_fn(metrics_middleware))
            .layer(axum_middleware::from_fn(request_id_middleware))
            .layer(CorsLayer::very_permissive())
            .with_state(state)
    }
}
