//! HTTP surface of the workbench server.
//!
//! [`http_api::api_router`] builds the axum router over a shared
//! [`http_api::ApiState`]; handlers translate domain errors through
//! [`api_error::ApiError`].

pub mod api_error;
pub mod http_api;
