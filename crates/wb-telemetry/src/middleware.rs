use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::global_metrics;

/// Axum middleware that records `api_requests_total{method,status}` and
/// `api_request_duration_seconds` for every request.
///
/// The path is left out of the labels: execution ids in URLs would make the
/// label set unbounded.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let m = global_metrics();
    m.increment_counter("api_requests_total", &[("method", &method), ("status", &status)]);
    m.record_histogram("api_request_duration_seconds", start.elapsed().as_secs_f64());

    response
}
