use axum::{response::IntoResponse, Json};

use wb_telemetry::metrics::global_metrics;

/// GET /api/metrics -- Prometheus text exposition.
pub(crate) async fn get_metrics_prometheus() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        global_metrics().export_prometheus(),
    )
}

/// GET /api/metrics/json
pub(crate) async fn get_metrics_json() -> impl IntoResponse {
    Json(global_metrics().export_json())
}
