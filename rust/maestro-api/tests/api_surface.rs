//! HTTP surface checks against the fully wired application.

use std::time::Duration;

use axum_test::TestServer;
use serde_json::{json, Value};

use maestro_api::config::AppConfig;
use maestro_api::server::create_app;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    // point the LLM adapter at a closed port so submissions fail fast
    config.llm.base_url = "http://127.0.0.1:9".to_string();
    config.llm.call_timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn health_reports_healthy() {
    let server = TestServer::new(create_app(test_config()).unwrap()).unwrap();

    let response = server.get("/workflows/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let server = TestServer::new(create_app(test_config()).unwrap()).unwrap();

    let response = server.get("/workflows/no-such-workflow").await;
    response.assert_status_not_found();

    let response = server.post("/workflows/no-such-workflow/cancel").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn empty_task_is_rejected() {
    let server = TestServer::new(create_app(test_config()).unwrap()).unwrap();

    let response = server
        .post("/workflows/simple")
        .json(&json!({ "initial_task": "   " }))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);

    let response = server
        .post("/workflows/flow")
        .json(&json!({ "initial_task": "" }))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn submission_is_accepted_and_failure_surfaces_in_the_snapshot() {
    let server = TestServer::new(create_app(test_config()).unwrap()).unwrap();

    let response = server
        .post("/workflows/simple")
        .json(&json!({
            "initial_task": "Summarize anything",
            "metadata": { "origin": "api-test" }
        }))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);

    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    // the unreachable LLM fails planning; the snapshot reflects it verbatim
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = server.get(&format!("/workflows/{workflow_id}")).await;
        response.assert_status_ok();
        let snapshot: Value = response.json();
        match snapshot["status"].as_str() {
            Some("failed") => {
                assert_eq!(snapshot["error"]["kind"], "llm_failed");
                assert_eq!(snapshot["plan"].as_array().unwrap().len(), 0);
                break;
            }
            Some("pending" | "running") => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "workflow never reached a terminal status"
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    // cancel after the terminal is still a 202 (idempotent surface)
    let response = server.post(&format!("/workflows/{workflow_id}/cancel")).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "already_terminal");
}
