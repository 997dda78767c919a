//! Observability for the workbench server.
//!
//! - **Logging**: `tracing-subscriber` setup, human-readable or JSON
//! - **Metrics**: labelled counters, gauges, and histograms with Prometheus
//!   and JSON export
//! - **Middleware**: axum layers for request ids and request metrics

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod tracing_setup;
