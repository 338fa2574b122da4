//! Defines the HTTP surface of the proxy.
//!
//! ## Structure
//! - `GET  /health` — liveness check, always `Healthy`
//! - `POST /`       — multipart upload, answered with the converted file

use crate::{
    handlers::{convert_handlers::convert_upload, health_handlers::health},
    services::conversion_service::ConversionService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router.
///
/// The router carries shared state (`ConversionService`) to the handlers.
pub fn routes() -> Router<ConversionService> {
    Router::new()
        .route("/health", get(health))
        .route("/", post(convert_upload))
}
