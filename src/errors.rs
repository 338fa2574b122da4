use crate::services::conversion_service::ConversionError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Message returned for every conversion failure. The category is only
/// visible in the server log.
const CONVERSION_FAILED: &str = "conversion failed";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match &err {
            ConversionError::Io(e) => error!(error = %e, "conversion i/o failure"),
            ConversionError::ProcessStart { command, source } => {
                error!(command = %command, error = %source, "converter could not be started")
            }
            ConversionError::ConversionFailed { exit_code } => {
                error!(exit_code, "converter exited with a failure code")
            }
            ConversionError::OutputMissing { path } => {
                error!(path = %path.display(), "converter produced no output")
            }
            ConversionError::TimedOut { timeout_ms } => {
                error!(timeout_ms, "converter timed out")
            }
        }
        AppError::internal(CONVERSION_FAILED)
    }
}

/// Malformed or oversized multipart bodies are the caller's fault; axum
/// already knows the right status (400 or 413).
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn every_conversion_failure_is_a_generic_500() {
        let errors = vec![
            ConversionError::Io(io::Error::other("disk full")),
            ConversionError::ProcessStart {
                command: "converter".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            ConversionError::ConversionFailed { exit_code: 1 },
            ConversionError::OutputMissing {
                path: "/tmp/x/output/a.pdf".into(),
            },
            ConversionError::TimedOut { timeout_ms: 100 },
        ];

        for err in errors {
            let app: AppError = err.into();
            assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(app.message, CONVERSION_FAILED);
        }
    }
}
