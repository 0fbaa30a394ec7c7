//! Pagewright Orchestrator
//!
//! Accepts task rounds over HTTP, generates static web apps with an LLM,
//! publishes them to GitHub Pages and reports the deployment to an
//! evaluation endpoint.

pub mod api;
pub mod attachment;
pub mod config;
pub mod error;
pub mod generation;
pub mod history;
pub mod notifier;
pub mod prompt;
pub mod publisher;
pub mod retry;
pub mod round;
pub mod task;
pub mod worker;

pub use api::{
    create_router, AcceptedResponse, AppState, ErrorResponse, HealthResponse, ServiceInfo,
    ValidationErrorResponse, ValidationIssue, VERSION,
};
pub use attachment::DataUri;
pub use config::{Config, DEFAULT_ENV_FILE};
pub use error::{LlmErrorKind, PagewrightError, Result};
pub use generation::{
    fallback_readme, parse_file_set, AppGenerator, ChatBackend, ChatMessage, ChatRequest,
    GenerationClient, GenerationRequest, OpenAiBackend, ResponseFormat,
};
pub use history::{RoundHistory, HISTORY_PATH};
pub use notifier::{HttpNotifier, Notifier};
pub use publisher::{mit_license, Publisher, RepositoryPublisher};
pub use retry::{RetryPolicy, Retryable};
pub use round::{RoundPhase, RoundRunner, StepPolicy};
pub use task::{
    Attachment, EvaluationRecord, FileSet, RoundRecord, TaskRequest, ROOT_PAGE,
};
pub use worker::{channel, Dispatcher, Worker};
