//! End-to-end tests for `POST /` against real unix converters
//! (`cp`, `true`, `false`, `sh`).
#![cfg(unix)]

mod common;

use axum::http::{StatusCode, header};
use common::{
    body_bytes, entries, multipart_text_only, post_multipart, test_app, test_config, upload,
};
use convert_proxy::app;
use std::time::{Duration, Instant};
use tower::ServiceExt;

async fn assert_generic_failure(response: axum::response::Response) {
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"], "conversion failed");
    assert_eq!(body["status"], 500);
}

#[tokio::test]
async fn copy_converter_round_trips_the_upload() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "cp", "{0} {1}", ".out");
    let content = b"line one\nline two\n\x00\xffbinary tail";

    let response = router.oneshot(upload("a.txt", content)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"a.txt.out\""
    );
    assert_eq!(&body_bytes(response).await[..], &content[..]);
    assert_eq!(entries(root.path()), 0, "workspace left behind");
}

#[tokio::test]
async fn same_input_and_output_extension_does_not_clobber_input() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "cp", "{0} {1}", ".txt");

    let response = router.oneshot(upload("a.txt", b"same ext")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"a.txt.txt\""
    );
    assert_eq!(&body_bytes(response).await[..], b"same ext");
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn directory_components_in_the_upload_name_stay_inside_the_workspace() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "cp", "{0} {1}", ".out");

    let response = router
        .oneshot(upload("../../escape.txt", b"contained"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], b"contained");
    assert_eq!(entries(root.path()), 0);
    assert!(!root.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn non_zero_exit_is_a_server_error() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "false", "{0} {1}", ".out");

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(upload("a.txt", b"payload"))
            .await
            .unwrap();
        assert_generic_failure(response).await;
    }
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn missing_output_is_a_server_error() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "true", "{0} {1}", ".out");

    let response = router.oneshot(upload("a.txt", b"payload")).await.unwrap();

    assert_generic_failure(response).await;
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn unknown_command_is_a_server_error() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "no-such-converter-on-this-host", "{0} {1}", ".out");

    let response = router.oneshot(upload("a.txt", b"payload")).await.unwrap();

    assert_generic_failure(response).await;
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn slow_converter_is_cut_off_at_the_timeout() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(root.path(), "sh", r#"-c "sleep 5" {0} {1}"#, ".out");
    cfg.conversion.timeout = Duration::from_millis(300);
    let router = app(&cfg);

    let started = Instant::now();
    let response = router.oneshot(upload("a.txt", b"payload")).await.unwrap();
    let elapsed = started.elapsed();

    assert_generic_failure(response).await;
    assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "waited too long: {elapsed:?}");
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn converter_printing_non_utf8_diagnostics_still_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let script = concat!(
        r#"-c "printf '\377\n' >&2; sleep 0.2; i=0; "#,
        r#"while [ $i -lt 50 ]; do echo progress >&2; i=$((i+1)); done; cp $0 $1" "#,
        "{0} {1}",
    );
    let router = test_app(root.path(), "sh", script, ".out");

    let response = router.oneshot(upload("a.txt", b"latin-1 noise")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], b"latin-1 noise");
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn concurrent_uploads_with_the_same_name_are_isolated() {
    let root = tempfile::tempdir().unwrap();
    // The sleep keeps both converters alive at the same time.
    let router = test_app(
        root.path(),
        "sh",
        r#"-c "sleep 0.2; cp $0 $1" {0} {1}"#,
        ".out",
    );

    let (first, second) = tokio::join!(
        router.clone().oneshot(upload("same.txt", b"first request")),
        router.clone().oneshot(upload("same.txt", b"second request")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(&body_bytes(first).await[..], b"first request");
    assert_eq!(&body_bytes(second).await[..], b"second request");
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn concurrency_limit_serializes_converters() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(
        root.path(),
        "sh",
        r#"-c "sleep 0.3; cp $0 $1" {0} {1}"#,
        ".out",
    );
    cfg.max_concurrent_conversions = Some(1);
    let router = app(&cfg);

    let started = Instant::now();
    let (first, second) = tokio::join!(
        router.clone().oneshot(upload("a.txt", b"a")),
        router.clone().oneshot(upload("b.txt", b"b")),
    );
    let elapsed = started.elapsed();

    assert_eq!(first.unwrap().status(), StatusCode::OK);
    assert_eq!(second.unwrap().status(), StatusCode::OK);
    assert!(elapsed >= Duration::from_millis(600), "ran in parallel: {elapsed:?}");
}

#[tokio::test]
async fn body_without_a_file_field_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let router = test_app(root.path(), "cp", "{0} {1}", ".out");

    let response = router
        .oneshot(post_multipart(multipart_text_only()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(root.path(), "cp", "{0} {1}", ".out");
    cfg.max_upload_bytes = 64;
    let router = app(&cfg);

    let response = router
        .oneshot(upload("big.bin", &vec![b'x'; 4096]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(entries(root.path()), 0);
}
