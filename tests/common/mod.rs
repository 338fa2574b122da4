//! Shared helpers for the HTTP integration tests.
#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, Response, header},
};
use convert_proxy::{
    app,
    config::{AppConfig, ConversionConfig},
    services::process_service::ArgumentTemplate,
};
use std::{path::Path, time::Duration};

pub const BOUNDARY: &str = "------------------------convertproxytest";

/// Build an application whose workspaces live under `root`.
pub fn test_app(root: &Path, command: &str, arguments: &str, output_extension: &str) -> Router {
    app(&test_config(root, command, arguments, output_extension))
}

pub fn test_config(
    root: &Path,
    command: &str,
    arguments: &str,
    output_extension: &str,
) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        temp_root: root.to_path_buf(),
        max_upload_bytes: 1024 * 1024,
        max_concurrent_conversions: None,
        conversion: ConversionConfig {
            output_extension: output_extension.into(),
            command: command.into(),
            arguments: ArgumentTemplate::parse(arguments).unwrap(),
            timeout: Duration::from_secs(10),
        },
    }
}

/// `multipart/form-data` body with a single file field named `file`.
pub fn multipart_body(file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `multipart/form-data` body with one plain text field and no file.
pub fn multipart_text_only() -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"note\"\r\n\r\n\
         not a file\r\n\
         --{BOUNDARY}--\r\n"
    )
    .into_bytes()
}

pub fn post_multipart(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn upload(file_name: &str, content: &[u8]) -> Request<Body> {
    post_multipart(multipart_body(file_name, content))
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

/// Number of entries directly under `root`.
pub fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}
