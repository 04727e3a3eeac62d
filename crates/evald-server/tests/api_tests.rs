use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use evald_core::capability::CapabilityGate;
use evald_core::interpreter::ScriptInterpreter;
use evald_core::service::{EvalService, ServiceOptions};
use evald_server::web::{AppState, create_router};
use evald_store::GitHistoryStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt; // for oneshot

/// Builds a router backed by a real git store in a temp directory.
async fn create_test_app(page_size: usize) -> (TempDir, Router) {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(GitHistoryStore::open(temp.path().join("state")).unwrap());

    let options = ServiceOptions {
        page_size,
        eval_timeout: Duration::from_secs(5),
        ..ServiceOptions::default()
    };
    let service = EvalService::start(
        Box::new(ScriptInterpreter::new()),
        CapabilityGate::default(),
        store,
        options,
    )
    .await
    .unwrap();

    let state = AppState {
        service: Arc::new(service),
    };
    (temp, create_router(state))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn eval(app: &Router, code: &str) -> (StatusCode, serde_json::Value) {
    post(app, "/api/eval", serde_json::json!({ "code": code })).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = get(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_eval_endpoint_basic() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = eval(&app, "set x 1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_error"], false);
    assert_eq!(json["output"][0], "1");
    assert_eq!(json["more_available"], false);
    assert!(json["commit"]["message"].as_str().unwrap().contains("set x 1"));

    let (status, json) = eval(&app, "set x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["output"][0], "1");
    // Pure reads do not commit.
    assert!(json["commit"].is_null());
}

#[tokio::test]
async fn test_eval_failure_is_data_not_transport_fault() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = eval(&app, "nosuchcommand 1 2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_error"], true);
    assert!(json["commit"].is_null());
}

#[tokio::test]
async fn test_denied_command_for_non_admin() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = eval(&app, "exec ls").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_error"], true);
    assert!(
        json["output"][0]
            .as_str()
            .unwrap()
            .contains("requires the admin capability")
    );

    let (status, json) = post(
        &app,
        "/api/eval",
        serde_json::json!({ "code": "set y 2", "is_admin": true, "user": "admin" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_error"], false);
    assert_eq!(json["commit"]["author"], "admin");
}

#[tokio::test]
async fn test_denied_command_via_proc_argument() {
    let (_temp, app) = create_test_app(25).await;
    eval(&app, "set x 1").await;
    eval(&app, "proc f {c} {$c}").await;

    let (status, json) = eval(&app, "f reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_error"], true);
    assert!(
        json["output"][0]
            .as_str()
            .unwrap()
            .contains("requires the admin capability")
    );

    let (_, json) = eval(&app, "set x").await;
    assert_eq!(json["output"][0], "1");
}

#[tokio::test]
async fn test_pagination_flow() {
    let (_temp, app) = create_test_app(20).await;

    eval(&app, "set n 0").await;
    let (status, json) = eval(&app, "repeat 50 {incr n; puts line-$n}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["output"].as_array().unwrap().len(), 20);
    assert_eq!(json["more_available"], true);

    let (status, json) = get(&app, "/api/more").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["output"].as_array().unwrap().len(), 20);
    assert_eq!(json["more_available"], true);

    let (status, json) = get(&app, "/api/more").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["output"].as_array().unwrap().len(), 10);
    assert_eq!(json["output"][9], "line-50");
    assert_eq!(json["more_available"], false);

    // Exhausted cursor is gone.
    let (status, json) = get(&app, "/api/more").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "no_active_page");
}

#[tokio::test]
async fn test_more_without_eval() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = get(&app, "/api/more").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "no_active_page");
    assert!(json["error"].as_str().unwrap().contains("No active page"));
}

#[tokio::test]
async fn test_history_newest_first_with_limit() {
    let (_temp, app) = create_test_app(25).await;
    eval(&app, "set a 1").await;
    eval(&app, "set b 2").await;
    eval(&app, "set c 3").await;

    let (status, json) = get(&app, "/api/history").await;
    assert_eq!(status, StatusCode::OK);
    let history = json["history"].as_array().unwrap();
    // Three evaluations plus the store's initial entry.
    assert_eq!(history.len(), 4);
    assert!(history[0]["message"].as_str().unwrap().contains("set c 3"));
    assert!(history[1]["message"].as_str().unwrap().contains("set b 2"));

    let (status, json) = get(&app, "/api/history?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rollback_unknown_commit() {
    let (_temp, app) = create_test_app(25).await;

    let (status, json) = post(
        &app,
        "/api/rollback",
        serde_json::json!({ "commit_hash": "deadbeef" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "unknown_commit");
}

#[tokio::test]
async fn test_rollback_restores_state() {
    let (_temp, app) = create_test_app(25).await;

    let (_, json) = eval(&app, "set x 1").await;
    let target = json["commit"]["commit_id"].as_str().unwrap().to_string();
    eval(&app, "set x 2").await;

    let (status, json) = post(
        &app,
        "/api/rollback",
        serde_json::json!({ "commit_hash": target }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("Rollback"));
    assert!(json["commit"]["commit_id"].is_string());

    let (_, json) = eval(&app, "set x").await;
    assert_eq!(json["output"][0], "1");
}

#[tokio::test]
async fn test_rollback_invalidates_pending_page() {
    let (_temp, app) = create_test_app(10).await;

    let (_, json) = eval(&app, "set x 1").await;
    let target = json["commit"]["commit_id"].as_str().unwrap().to_string();
    eval(&app, "repeat 30 {puts x}").await;

    post(
        &app,
        "/api/rollback",
        serde_json::json!({ "commit_hash": target }),
    )
    .await;

    let (status, json) = get(&app, "/api/more").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "no_active_page");
}
