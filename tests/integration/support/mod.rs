//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use pagewright_github::{HostingPlatform, MemoryPlatform};
use pagewright_orchestrator::{
    Attachment, ChatBackend, ChatRequest, GenerationClient, HttpNotifier, RepositoryPublisher,
    ResponseFormat, Result, RetryPolicy, RoundRunner, TaskRequest,
};
use serde_json::Value;

/// Finds an available port for testing.
pub fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(3)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
}

/// Chat backend that replays queued app replies and answers README
/// requests with a fixed document.
#[derive(Default)]
pub struct ScriptedChat {
    app_replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(app_replies: &[Value]) -> Arc<Self> {
        Arc::new(Self {
            app_replies: Mutex::new(app_replies.iter().map(Value::to_string).collect()),
            requests: Mutex::default(),
        })
    }

    /// User messages of every app generation request, in order.
    pub fn app_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter(|r| r.format == ResponseFormat::JsonObject)
            .map(|r| r.messages.last().expect("user message").content.clone())
            .collect()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let format = request.format;
        self.requests.lock().expect("lock").push(request);
        match format {
            ResponseFormat::JsonObject => Ok(self
                .app_replies
                .lock()
                .expect("lock")
                .pop_front()
                .expect("unexpected app generation request")),
            ResponseFormat::Text => Ok("# Generated README\n\nUsage notes.".to_string()),
        }
    }
}

/// Records received by a callback server.
pub type Received = Arc<Mutex<Vec<Value>>>;

async fn receive(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    received.lock().expect("lock").push(body);
    StatusCode::OK
}

/// Spawns an evaluation endpoint and returns its URL.
pub async fn spawn_callback() -> (String, Received) {
    let received = Received::default();
    let router = Router::new()
        .route("/notify", post(receive))
        .with_state(Arc::clone(&received));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    (format!("http://{addr}/notify"), received)
}

/// Waits until `count` records arrived or five seconds pass.
pub async fn wait_for_records(received: &Received, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let records = received.lock().expect("lock").clone();
        if records.len() >= count || tokio::time::Instant::now() >= deadline {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Production runner wired to an in-memory platform and a scripted model.
pub fn build_runner(platform: &Arc<MemoryPlatform>, chat: &Arc<ScriptedChat>) -> RoundRunner {
    let generator = GenerationClient::new(Arc::clone(chat) as Arc<dyn ChatBackend>, fast_retry());
    let publisher = RepositoryPublisher::new(
        Arc::clone(platform) as Arc<dyn HostingPlatform>,
        fast_retry(),
    );
    let notifier =
        HttpNotifier::new(fast_retry(), Duration::from_secs(5)).expect("Failed to build notifier");
    RoundRunner::new(Arc::new(generator), Arc::new(publisher), Arc::new(notifier))
        .with_settle_delay(Duration::ZERO)
}

/// A task request aimed at `evaluation_url`.
pub fn task_request(task: &str, round: u32, brief: &str, evaluation_url: &str) -> TaskRequest {
    TaskRequest {
        email: "student@example.com".to_string(),
        secret: "integration-secret".to_string(),
        task: task.to_string(),
        round,
        nonce: format!("nonce-{round}"),
        brief: brief.to_string(),
        checks: vec![format!("Round {round} check is satisfied")],
        evaluation_url: evaluation_url.to_string(),
        attachments: vec![Attachment {
            name: "sales.csv".to_string(),
            url: "data:text/csv;base64,cHJvZHVjdCxzYWxlcwphLDEw".to_string(),
        }],
    }
}
