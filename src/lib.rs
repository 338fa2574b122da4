//! HTTP front end for an external command-line file converter.
//!
//! Each `POST /` stages the uploaded file in its own temporary workspace,
//! runs the configured command against it and returns the produced file.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::{Router, extract::DefaultBodyLimit};
use config::AppConfig;
use services::{conversion_service::ConversionService, workspace_service::WorkspaceManager};
use tower_http::trace::TraceLayer;

/// Assemble the application router from a resolved configuration.
pub fn app(cfg: &AppConfig) -> Router {
    let service = ConversionService::new(
        cfg.conversion.clone(),
        WorkspaceManager::new(&cfg.temp_root),
        cfg.max_concurrent_conversions,
    );

    routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
