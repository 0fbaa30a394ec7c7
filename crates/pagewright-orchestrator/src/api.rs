//! HTTP gateway.
//!
//! Accepts task requests, authenticates them against the shared secret and
//! hands them to the background worker. Responses never wait for a round.
//!
//! # Endpoints
//!
//! - `POST /task` - Accept a round for background processing
//! - `GET /` - Service banner
//! - `GET /health` - Configuration presence flags
//!
//! # Example
//!
//! ```no_run
//! use pagewright_orchestrator::{create_router, AppState, Config, Dispatcher};
//!
//! # async fn example(config: Config, dispatcher: Dispatcher) {
//! let router = create_router(AppState::new(&config, dispatcher));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PagewrightError;
use crate::task::TaskRequest;
use crate::worker::Dispatcher;

/// Version reported by `GET /`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for an accepted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Always `accepted`.
    pub status: String,
    /// Human-readable confirmation.
    pub message: String,
    /// Task identifier.
    pub task: String,
    /// Round number.
    pub round: u32,
}

impl AcceptedResponse {
    fn for_request(request: &TaskRequest) -> Self {
        Self {
            status: "accepted".to_string(),
            message: format!(
                "Task {} accepted for processing (Round {})",
                request.task, request.round
            ),
            task: request.task.clone(),
            round: request.round,
        }
    }
}

/// Response body for `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Always `ok`.
    pub status: String,
    /// Service banner.
    pub message: String,
    /// Crate version.
    pub version: String,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy`.
    pub status: String,
    /// Whether GitHub credentials are configured.
    pub github_configured: bool,
    /// Whether generation credentials are configured.
    pub llm_configured: bool,
    /// Account that owns generated repositories.
    pub username: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

/// One problem found in a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Path to the offending value, starting with `body`.
    pub loc: Vec<Value>,
    /// What is wrong.
    pub msg: String,
    /// Machine-readable category.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Response body for a request that failed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorResponse {
    /// Every problem found.
    pub detail: Vec<ValidationIssue>,
    /// The body as received.
    pub body: Value,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
///
/// Holds only what the handlers need; credentials other than the shared
/// secret stay with the worker.
#[derive(Clone)]
pub struct AppState {
    secret_key: String,
    /// Account reported by `/health`.
    pub github_username: String,
    /// Whether GitHub credentials are configured.
    pub github_configured: bool,
    /// Whether generation credentials are configured.
    pub llm_configured: bool,
    /// Queue feeding the background worker.
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Creates state from the process configuration.
    #[must_use]
    pub fn new(config: &Config, dispatcher: Dispatcher) -> Self {
        Self {
            secret_key: config.secret_key.clone(),
            github_username: config.github_username.clone(),
            github_configured: config.github_configured(),
            llm_configured: config.llm_configured(),
            dispatcher,
        }
    }

    fn secret_matches(&self, presented: &str) -> bool {
        let expected = self.secret_key.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len()
            && expected
                .iter()
                .zip(presented)
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The body could not be turned into a valid task request.
    Validation { issues: Vec<ValidationIssue>, body: Value },
    /// The shared secret did not match.
    Unauthorized,
    /// The worker is gone.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation { issues, body } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ValidationErrorResponse {
                    detail: issues,
                    body,
                }),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: PagewrightError::Unauthorized.to_string(),
                }),
            )
                .into_response(),
            Self::Unavailable(error) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { error })).into_response()
            }
        }
    }
}

impl ApiError {
    fn invalid(loc: Vec<Value>, msg: impl Into<String>, kind: &str, body: Value) -> Self {
        Self::Validation {
            issues: vec![ValidationIssue {
                loc,
                msg: msg.into(),
                kind: kind.to_string(),
            }],
            body,
        }
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints and request tracing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/task", post(handle_task))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /task`.
///
/// Structural problems answer 422 before the secret is checked; semantic
/// problems answer 422 only for authenticated callers.
async fn handle_task(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        ApiError::invalid(
            vec![Value::from("body"), Value::from(e.column())],
            format!("JSON decode error: {e}"),
            "json_invalid",
            Value::String(String::from_utf8_lossy(&body).into_owned()),
        )
    })?;

    let request: TaskRequest = serde_json::from_value(value.clone()).map_err(|e| {
        let (loc, kind) = locate_serde_error(&e.to_string());
        ApiError::invalid(loc, e.to_string(), kind, value.clone())
    })?;

    if !state.secret_matches(&request.secret) {
        warn!(task = %request.task, round = request.round, "Rejected task with invalid secret");
        return Err(ApiError::Unauthorized);
    }

    match request.validate() {
        Ok(()) => {}
        Err(PagewrightError::InvalidRequest { field, message }) => {
            return Err(ApiError::invalid(field_loc(&field), message, "value_error", value));
        }
        Err(e) => {
            return Err(ApiError::invalid(
                vec![Value::from("body")],
                e.to_string(),
                "value_error",
                value,
            ));
        }
    }

    let accepted = AcceptedResponse::for_request(&request);
    state
        .dispatcher
        .dispatch(request)
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    info!(task = %accepted.task, round = accepted.round, "Task accepted");
    Ok(Json(accepted))
}

/// Handler for `GET /`.
async fn handle_root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "ok".to_string(),
        message: "Automated Task Handler API is running".to_string(),
        version: VERSION.to_string(),
    })
}

/// Handler for `GET /health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        github_configured: state.github_configured,
        llm_configured: state.llm_configured,
        username: state.github_username.clone(),
    })
}

/// Maps a serde error message to a location and category.
fn locate_serde_error(message: &str) -> (Vec<Value>, &'static str) {
    let missing = Regex::new(r"missing field `([^`]+)`")
        .ok()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1));
    if let Some(field) = missing {
        return (
            vec![Value::from("body"), Value::from(field.as_str())],
            "missing",
        );
    }
    (vec![Value::from("body")], "value_error")
}

/// `attachments.0.name` becomes `["body", "attachments", 0, "name"]`.
fn field_loc(field: &str) -> Vec<Value> {
    std::iter::once(Value::from("body"))
        .chain(field.split('.').map(|part| {
            part.parse::<u64>()
                .map_or_else(|_| Value::from(part), Value::from)
        }))
        .collect()
}
