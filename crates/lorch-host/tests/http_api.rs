use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use lorch_host::http::router;
use lorch_host::{Orchestrator, OrchestratorConfig, TimingConfig};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_router(dir: &Path) -> Router {
    let config = OrchestratorConfig {
        cli_path: dir.join("missing-ledger-cli"),
        mapping_path: dir.join("match_mapping.json"),
        node_log: dir.join("node.log"),
        deployment_log: dir.join("deployment_ids.json"),
        timing: TimingConfig::immediate(),
        ..OrchestratorConfig::default()
    };
    router(Arc::new(Orchestrator::new(config)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if body.is_some() {
        req = req.header("content-type", "application/json");
    }
    let req = req
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_and_empty_state() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = call(&app, "GET", "/linera/linera-config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isReady"], false);
    assert_eq!(body["linera_wallet"], Value::Null);

    for method in ["GET", "POST"] {
        let (status, body) = call(&app, method, "/linera/linera-service-status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isRunning"], false);
        assert_eq!(body["pid"], Value::Null);
    }

    let (status, body) = call(&app, "GET", "/linera/match-mapping/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn unknown_mapping_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());
    let (status, body) = call(&app, "GET", "/linera/match-mapping/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn stored_mapping_is_served_and_blocks_resubmission() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("match_mapping.json"),
        serde_json::to_vec_pretty(&json!({
            "m-done": {
                "chainId": "chain-9",
                "appId": "app-9",
                "status": "submitted",
                "submittedOpId": "op-9",
                "submittedAt": "2026-01-01T00:00:00Z"
            }
        }))
        .unwrap(),
    )
    .unwrap();
    let app = test_router(dir.path());

    let (status, body) = call(&app, "GET", "/linera/match-mapping/m-done", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chainId"], "chain-9");
    assert_eq!(body["appId"], "app-9");
    assert_eq!(body["status"], "submitted");

    let (_, body) = call(&app, "GET", "/linera/match-mapping/all", None).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["mappings"][0]["matchId"], "m-done");

    let (status, body) = call(
        &app,
        "POST",
        "/linera/submit-match-result",
        Some(r#"{"matchResult":{"matchId":"m-done","player1Username":"a"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "duplicate_submission");
}

#[tokio::test]
async fn submission_validation() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());

    let (status, body) = call(
        &app,
        "POST",
        "/linera/submit-match-result",
        Some(r#"{"matchResult":{"matchId":"m1"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "mapping_not_found");

    let (status, body) = call(&app, "POST", "/linera/submit-match-result", Some("[1,2]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = call(&app, "POST", "/linera/submit-match-result", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn allocation_requires_ids() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());

    let (status, body) = call(&app, "POST", "/linera/open-and-create", Some("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("moduleId"));

    let (status, body) = call(
        &app,
        "POST",
        "/linera/create-xfighter-app",
        Some(r#"{"moduleId":"m","leaderboardAppId":"lb"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("chainId"));

    let (status, body) = call(
        &app,
        "POST",
        "/linera/get-leaderboard-data",
        Some(r#"{"chainId":"","appId":""}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn service_control_errors_map_to_status_codes() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());

    let (status, _) = call(&app, "POST", "/linera/start-linera-service?port=1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/linera/start-linera-service", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "launch_error");

    let (status, body) = call(&app, "POST", "/linera/stop-linera-service", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(&app, "POST", "/linera/open-match-chain", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "launch_error");
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let dir = TempDir::new().unwrap();
    let app = test_router(dir.path());

    let (status, doc) = call(&app, "GET", "/api/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["openapi"].as_str().unwrap().starts_with("3."));
    let paths = doc["paths"].as_object().unwrap();
    for path in [
        "/health",
        "/linera/open-and-create",
        "/linera/submit-match-result",
        "/linera/match-mapping/{match_id}",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
    let status_ops = &paths["/linera/linera-service-status"];
    assert!(status_ops.get("get").is_some());
    assert!(status_ops.get("post").is_some());
}
