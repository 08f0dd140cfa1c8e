//! Tests for the HTTP control surface

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use php_sentinel::{build_router, AppState, Config, SharedState};
use std::fs;
use tower::ServiceExt;

fn test_app() -> (Router, SharedState) {
    let state = AppState::new(Config::default());
    (build_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_ingest_then_performance_query() {
    let (app, _state) = test_app();

    // Given: an entry reported by the probe, without timestamp
    let payload =
        r#"{"method":"GET","uri":"/users","duration_ms":120.5,"memory_mb":12.3,"query_count":4}"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects/ingest")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // When: querying performance for a project with no log file
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("/projects/performance?path={}", dir.path().display());
    let response = app
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Then: the ingested entry comes back with a non-empty timestamp
    let entries = body_json(response).await;
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["method"], "GET");
    assert_eq!(entries[0]["uri"], "/users");
    assert_eq!(entries[0]["duration_ms"], 120.5);
    assert_eq!(entries[0]["query_count"], 4);
    assert!(!entries[0]["timestamp"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_ingest_is_rejected() {
    let (app, state) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects/ingest")
                .header("content-type", "application/json")
                .body(Body::from("{not valid json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn test_performance_clear() {
    let (app, state) = test_app();
    state.store.add(php_sentinel::PerformanceEntry {
        method: "GET".to_string(),
        uri: "/a".to_string(),
        ..Default::default()
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects/performance/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn test_alerts_no_content_when_quiet() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(Request::builder().uri("/alerts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_audit_enable_conflict_and_disable() {
    let (app, _state) = test_app();

    let project = tempfile::tempdir().unwrap();
    let public = project.path().join("public");
    fs::create_dir_all(&public).unwrap();
    fs::write(public.join("index.php"), "<?php\n$app->run();\n").unwrap();

    let req_body = serde_json::json!({ "path": project.path().to_string_lossy() }).to_string();
    let post = |uri: &str| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(req_body.clone()))
            .unwrap()
    };

    let response = app.clone().oneshot(post("/audit/enable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(post("/audit/enable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/audit/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = body_json(response).await;
    let entry = status
        .as_object()
        .unwrap()
        .values()
        .next()
        .expect("one audit entry");
    assert_eq!(entry["running"], true);
    assert_eq!(entry["port"], 0);

    let response = app.clone().oneshot(post("/audit/disable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Disable again: idempotent success
    let response = app.oneshot(post("/audit/disable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_project_logs_requires_path() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/projects/logs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_project_routes_error_surfaces_as_500() {
    let (app, _state) = test_app();

    // 空目录不是 Laravel 项目，artisan 执行失败
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("/projects/routes?path={}", dir.path().display());
    let response = app
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_telemetry_snapshot_shape() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/telemetry")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert!(status["php_fpm"].is_boolean());
    assert!(status["system_stats"]["php_fpm_worker_count"].is_number());
}
