//! Integration tests for the HTTP gateway.
//!
//! A real server is bound to a local port; accepted tasks flow through the
//! worker and end with a callback to a local evaluation endpoint.

mod support;

use std::sync::Arc;
use std::time::Duration;

use pagewright_github::MemoryPlatform;
use pagewright_orchestrator::{channel, create_router, AppState, Config};
use serde_json::{json, Value};
use support::{build_runner, find_available_port, spawn_callback, wait_for_records, ScriptedChat};

fn test_config() -> Config {
    Config::from_lookup(|key| {
        match key {
            "SECRET_KEY" => Some("integration-secret"),
            "GITHUB_TOKEN" => Some("ghp_token"),
            "GITHUB_USERNAME" => Some("octo"),
            "LLM_API_KEY" => Some("sk-test"),
            _ => None,
        }
        .map(str::to_string)
    })
    .expect("Failed to build config")
}

/// Spawns the gateway and its worker; returns the base URL.
async fn spawn_test_server(platform: &Arc<MemoryPlatform>, chat: &Arc<ScriptedChat>) -> String {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let (dispatcher, worker) = channel(build_runner(platform, chat));
    tokio::spawn(worker.run());

    let router = create_router(AppState::new(&test_config(), dispatcher));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{addr}")
}

fn task_body(task: &str, round: u32, secret: &str, evaluation_url: &str) -> Value {
    json!({
        "email": "student@example.com",
        "secret": secret,
        "task": task,
        "round": round,
        "nonce": format!("nonce-{round}"),
        "brief": "Show total sales in #total-sales",
        "checks": ["Page has element #total-sales"],
        "evaluation_url": evaluation_url,
        "attachments": []
    })
}

#[tokio::test]
async fn test_accepted_task_is_built_and_reported() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[json!({ "index.html": "<h1 id=\"total-sales\">10</h1>" })]);
    let (callback_url, received) = spawn_callback().await;
    let base = spawn_test_server(&platform, &chat).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/task"))
        .json(&task_body("gateway-demo", 1, "integration-secret", &callback_url))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("invalid JSON");
    assert_eq!(body["status"], "accepted");
    assert_eq!(
        body["message"],
        "Task gateway-demo accepted for processing (Round 1)"
    );

    let records = wait_for_records(&received, 1).await;
    assert_eq!(records.len(), 1, "evaluation endpoint was not called");
    assert_eq!(records[0]["task"], "gateway-demo");
    assert_eq!(records[0]["repo_url"], "https://github.com/octo/gateway-demo");
    assert!(platform.pages_enabled("gateway-demo"));
}

#[tokio::test]
async fn test_invalid_secret_schedules_nothing() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[]);
    let (callback_url, received) = spawn_callback().await;
    let base = spawn_test_server(&platform, &chat).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/task"))
        .json(&task_body("gateway-demo", 1, "wrong", &callback_url))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("invalid JSON");
    assert_eq!(body["error"], "Invalid secret");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(received.lock().expect("lock").is_empty());
    assert_eq!(platform.repositories_created(), 0);
}

#[tokio::test]
async fn test_health_and_banner() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[]);
    let base = spawn_test_server(&platform, &chat).await;
    let client = reqwest::Client::new();

    let banner: Value = client
        .get(format!("{base}/"))
        .send()
        .await
        .expect("request failed")
        .json()
        .await
        .expect("invalid JSON");
    assert_eq!(banner["status"], "ok");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("request failed")
        .json()
        .await
        .expect("invalid JSON");
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["github_configured"], true);
    assert_eq!(health["llm_configured"], true);
    assert_eq!(health["username"], "octo");
    assert!(!health.to_string().contains("integration-secret"));
}
