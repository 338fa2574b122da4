//! Liveness handler.
//!
//! - GET /health -> "Healthy"

use axum::{http::StatusCode, response::IntoResponse};

/// `GET /health`
///
/// Always returns 200 with the plain-text body `Healthy`. It touches neither
/// the configuration nor the converter, so it stays green while conversions
/// are failing.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "Healthy")
}
