//! End-to-end round tests.
//!
//! Each test drives the production generation client, publisher and
//! notifier against an in-memory hosting platform, a scripted model and a
//! local evaluation endpoint.

mod support;

use std::sync::Arc;

use pagewright_github::{HostingPlatform, MemoryPlatform};
use pagewright_orchestrator::{PagewrightError, HISTORY_PATH};
use serde_json::json;
use support::{build_runner, spawn_callback, task_request, ScriptedChat};

#[tokio::test]
async fn test_first_round_end_to_end() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[json!({
        "index.html": "<html><body><h1 id=\"total-sales\">10</h1><script src=\"app.js\"></script></body></html>",
        "app.js": "console.log('ready');"
    })]);
    let (callback_url, received) = spawn_callback().await;
    let runner = build_runner(&platform, &chat);

    let request = task_request("sales-summary", 1, "Show total sales in #total-sales", &callback_url);
    let record = runner.run(&request).await.expect("round 1 failed");

    assert_eq!(record.repo_url, "https://github.com/octo/sales-summary");
    assert_eq!(record.pages_url, "https://octo.github.io/sales-summary/");
    assert_eq!(
        record.commit_sha,
        platform.latest_commit("sales-summary").await.expect("no commits")
    );
    assert!(platform.pages_enabled("sales-summary"));
    assert_eq!(
        platform.paths("sales-summary"),
        vec![HISTORY_PATH, "LICENSE", "README.md", "app.js", "index.html"]
    );
    assert_eq!(
        platform.file_text("sales-summary", "README.md").as_deref(),
        Some("# Generated README\n\nUsage notes.\n")
    );

    let prompts = chat.app_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Show total sales in #total-sales"));
    assert!(prompts[0].contains("1. Round 1 check is satisfied"));
    assert!(prompts[0].contains("sales.csv"));

    let records = received.lock().expect("lock").clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["email"], "student@example.com");
    assert_eq!(records[0]["task"], "sales-summary");
    assert_eq!(records[0]["round"], 1);
    assert_eq!(records[0]["nonce"], "nonce-1");
    assert_eq!(records[0]["commit_sha"], record.commit_sha.as_str());
    assert_eq!(records[0]["pages_url"], "https://octo.github.io/sales-summary/");
}

#[tokio::test]
async fn test_revision_round_builds_on_previous_round() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[
        json!({ "index.html": "<h1 id=\"total-sales\">10</h1>" }),
        json!({
            "index.html": "<h1 id=\"total-sales\">10</h1><canvas id=\"chart\"></canvas>",
            "chart.js": "draw();"
        }),
    ]);
    let (callback_url, received) = spawn_callback().await;
    let runner = build_runner(&platform, &chat);

    let first = runner
        .run(&task_request("sales-summary", 1, "Show total sales in #total-sales", &callback_url))
        .await
        .expect("round 1 failed");
    let second = runner
        .run(&task_request("sales-summary", 2, "Add a bar chart in #chart", &callback_url))
        .await
        .expect("round 2 failed");

    assert_ne!(first.commit_sha, second.commit_sha);
    assert_eq!(second.repo_url, first.repo_url);
    assert_eq!(platform.repositories_created(), 1);
    assert_eq!(
        platform.file_text("sales-summary", "chart.js").as_deref(),
        Some("draw();")
    );

    let prompts = chat.app_prompts();
    assert_eq!(prompts.len(), 2);
    let revision = &prompts[1];
    assert!(revision.contains("Show total sales in #total-sales"), "history missing");
    assert!(revision.contains("Add a bar chart in #chart"));
    assert!(revision.contains("Round 1 check is satisfied"));
    assert!(revision.contains("<h1 id=\"total-sales\">10</h1>"), "current code missing");
    assert!(!revision.contains(HISTORY_PATH));

    let records = received.lock().expect("lock").clone();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["round"], 2);
    assert_eq!(records[1]["nonce"], "nonce-2");
}

#[tokio::test]
async fn test_revision_without_first_round_fails() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[]);
    let (callback_url, received) = spawn_callback().await;
    let runner = build_runner(&platform, &chat);

    let err = runner
        .run(&task_request("never-built", 2, "Change the colour", &callback_url))
        .await
        .expect_err("round 2 without round 1 should fail");

    assert!(matches!(err, PagewrightError::RepositoryUnavailable { .. }));
    assert!(chat.app_prompts().is_empty());
    assert!(received.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn test_missing_root_page_publishes_nothing() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    let chat = ScriptedChat::new(&[json!({ "main.html": "<h1>hi</h1>" })]);
    let (callback_url, received) = spawn_callback().await;
    let runner = build_runner(&platform, &chat);

    let err = runner
        .run(&task_request("no-root", 1, "Say hi", &callback_url))
        .await
        .expect_err("missing index.html should fail");

    assert!(matches!(err, PagewrightError::MissingRootPage { round: 1 }));
    assert_eq!(platform.repositories_created(), 0);
    assert!(received.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn test_transient_platform_failures_are_retried() {
    let platform = Arc::new(MemoryPlatform::new("octo"));
    platform.inject_transient_failures(2);
    let chat = ScriptedChat::new(&[json!({ "index.html": "<h1>ok</h1>" })]);
    let (callback_url, received) = spawn_callback().await;
    let runner = build_runner(&platform, &chat);

    runner
        .run(&task_request("flaky", 1, "Say ok", &callback_url))
        .await
        .expect("transient failures should be absorbed");

    assert_eq!(platform.file_text("flaky", "index.html").as_deref(), Some("<h1>ok</h1>"));
    assert_eq!(received.lock().expect("lock").len(), 1);
}
