//! Integration tests for the RPC translator and stats endpoints, exercised
//! through the full axum router so routing, not just individual functions,
//! is under test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use aurcache_common::AppConfig;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn test_app() -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AppConfig {
        port: 0,
        cache_root: dir.path().to_path_buf(),
        max_upload_size: bytesize::ByteSize::mb(50),
        log_json: false,
    };
    let router = aurcache_server::build_router(config).await.expect("router");
    (router, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("valid json")
}

#[tokio::test]
async fn stats_endpoint_reports_zero_counts_on_empty_cache() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["totalPackages"], 0);
    assert_eq!(json["totalRequests"], 0);
    assert_eq!(json["cacheSize"], "0.00 B");
}

#[tokio::test]
async fn rpc_with_missing_type_returns_empty_response() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/rpc/?v=5").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["resultcount"], 0);
    assert_eq!(json["results"], serde_json::json!([]));
    assert_eq!(json["type"], "unknown");
    assert_eq!(json["version"], 5);
}

#[tokio::test]
async fn rpc_info_with_no_args_echoes_inbound_type() {
    // spec.md §8 scenario S6: `type=info` with no `arg[]` is an empty query,
    // not a zero-package info lookup.
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/rpc/?v=5&type=info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["resultcount"], 0);
    assert_eq!(json["type"], "info");
    assert_eq!(json["version"], 5);
}

#[tokio::test]
async fn rpc_search_with_no_matches_and_no_arg_is_empty() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/rpc/?v=5&type=search&arg=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["resultcount"], 0);
    assert_eq!(json["type"], "multiinfo");
}

#[tokio::test]
async fn unknown_path_falls_back_to_plain_text_echo() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/whatever").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("GET"));
}
