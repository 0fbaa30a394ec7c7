//! App and README generation through an OpenAI-compatible chat API.
//!
//! [`GenerationClient`] implements [`AppGenerator`] on top of any
//! [`ChatBackend`]. [`OpenAiBackend`] is the production backend; tests plug
//! in scripted ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{LlmErrorKind, PagewrightError, Result};
use crate::prompt::{readme_prompt, PromptBuilder, APP_SYSTEM_PROMPT, README_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use crate::task::{Attachment, FileSet, RoundRecord, TaskRequest, ROOT_PAGE};

/// Sampling temperature used for every completion.
pub const TEMPERATURE: f32 = 0.7;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Generation contract
// ============================================================================

/// Everything the generator needs to produce one round's file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Brief of the current round.
    pub brief: String,
    /// Checks of the current round.
    pub checks: Vec<String>,
    /// Attachments of the current round.
    pub attachments: Vec<Attachment>,
    /// Current round number.
    pub round: u32,
    /// Records of rounds `1..round`, oldest first.
    pub prior_rounds: Vec<RoundRecord>,
    /// Files currently in the repository.
    pub current_files: FileSet,
}

impl GenerationRequest {
    /// Request for a fresh app.
    pub fn first_round(task: &TaskRequest) -> Self {
        Self::revision(task, Vec::new(), FileSet::new())
    }

    /// Request for a revision of existing code.
    pub fn revision(task: &TaskRequest, prior_rounds: Vec<RoundRecord>, current_files: FileSet) -> Self {
        Self {
            brief: task.brief.clone(),
            checks: task.checks.clone(),
            attachments: task.attachments.clone(),
            round: task.round,
            prior_rounds,
            current_files,
        }
    }
}

/// Produces app files and documentation.
#[async_trait]
pub trait AppGenerator: Send + Sync {
    /// Generates the full file set for a round. The result always contains
    /// [`ROOT_PAGE`].
    async fn generate_app(&self, request: &GenerationRequest) -> Result<FileSet>;

    /// Generates README Markdown for the app.
    async fn generate_readme(&self, task: &str, brief: &str, round: u32) -> Result<String>;
}

// ============================================================================
// Chat backend
// ============================================================================

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Shape the model is asked to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free text.
    Text,
    /// A single JSON object.
    JsonObject,
}

/// A completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Requested answer shape.
    pub format: ResponseFormat,
}

/// A chat completion service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the assistant's reply text.
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Backend for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    /// Creates a backend with the given request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PagewrightError::llm_api_error(
                    LlmErrorKind::Other,
                    format!("failed to create HTTP client: {e}"),
                )
            })?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Creates a backend from process settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.llm_base_url,
            &config.llm_api_key,
            &config.llm_model,
            config.llm_timeout(),
        )
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let body = OpenAiRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: match request.format {
                ResponseFormat::JsonObject => Some(OpenAiResponseFormat {
                    kind: "json_object",
                }),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PagewrightError::llm_api_error(
                LlmErrorKind::from_status(status.as_u16()),
                format!("status {status}: {error_text}"),
            ));
        }

        let parsed: OpenAiResponse = response.json().await.map_err(|e| {
            PagewrightError::llm_api_error(LlmErrorKind::Other, format!("unreadable completion: {e}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PagewrightError::llm_api_error(LlmErrorKind::Other, "completion has no content")
            })?;
        debug!(chars = content.len(), "Completion received");
        Ok(content)
    }
}

fn map_transport_error(error: reqwest::Error) -> PagewrightError {
    let message = if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("HTTP error: {error}")
    };
    PagewrightError::llm_api_error(LlmErrorKind::Network, message)
}

// ============================================================================
// Generation client
// ============================================================================

/// [`AppGenerator`] that prompts a [`ChatBackend`].
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
}

impl GenerationClient {
    /// Wraps a backend; transient failures are retried per `retry`.
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    async fn complete(&self, operation: &str, request: ChatRequest) -> Result<String> {
        self.retry
            .run(operation, || self.backend.complete(request.clone()))
            .await
    }
}

#[async_trait]
impl AppGenerator for GenerationClient {
    #[instrument(skip(self, request), fields(round = request.round))]
    async fn generate_app(&self, request: &GenerationRequest) -> Result<FileSet> {
        let prompt = PromptBuilder::new(request).build();
        info!(
            prompt_chars = prompt.len(),
            prior_rounds = request.prior_rounds.len(),
            current_files = request.current_files.len(),
            "Requesting app generation"
        );

        let raw = self
            .complete(
                "generate_app",
                ChatRequest {
                    messages: vec![
                        ChatMessage::system(APP_SYSTEM_PROMPT),
                        ChatMessage::user(prompt),
                    ],
                    temperature: TEMPERATURE,
                    format: ResponseFormat::JsonObject,
                },
            )
            .await?;

        let files = parse_file_set(&raw, request.round)?;
        info!(files = files.len(), "App generated");
        Ok(files)
    }

    #[instrument(skip(self, brief))]
    async fn generate_readme(&self, task: &str, brief: &str, round: u32) -> Result<String> {
        let raw = self
            .complete(
                "generate_readme",
                ChatRequest {
                    messages: vec![
                        ChatMessage::system(README_SYSTEM_PROMPT),
                        ChatMessage::user(readme_prompt(task, brief, round)),
                    ],
                    temperature: TEMPERATURE,
                    format: ResponseFormat::Text,
                },
            )
            .await?;

        let readme = raw.trim();
        if readme.is_empty() {
            return Err(PagewrightError::malformed_generation("README response was empty"));
        }
        Ok(format!("{readme}\n"))
    }
}

/// Parses a model reply into a file set.
///
/// The reply must be a JSON object of relative paths to string contents and
/// must include [`ROOT_PAGE`].
///
/// # Errors
///
/// `MalformedGeneration` for anything that is not such an object, and
/// `MissingRootPage` when the root page is absent.
pub fn parse_file_set(raw: &str, round: u32) -> Result<FileSet> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| {
        PagewrightError::malformed_generation(format!("response is not valid JSON: {e}"))
    })?;
    let Value::Object(entries) = value else {
        return Err(PagewrightError::malformed_generation(
            "response must be a JSON object of file paths to contents",
        ));
    };

    let mut files = FileSet::new();
    for (path, content) in entries {
        if !is_safe_relative_path(&path) {
            return Err(PagewrightError::malformed_generation(format!(
                "'{path}' is not a safe relative file path"
            )));
        }
        let Value::String(content) = content else {
            return Err(PagewrightError::malformed_generation(format!(
                "content of '{path}' is not a string"
            )));
        };
        files.insert(path, content);
    }

    if !files.contains_key(ROOT_PAGE) {
        return Err(PagewrightError::MissingRootPage { round });
    }
    Ok(files)
}

fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// README used when generation fails.
pub fn fallback_readme(task: &str, brief: &str) -> String {
    format!(
        "# {task}\n\n\
         ## Description\n{brief}\n\n\
         ## Features\n\
         - Minimal working application\n\
         - Responsive design\n\
         - Modern UI\n\n\
         ## Setup\n\
         1. Clone this repository\n\
         2. Open `{ROOT_PAGE}` in a web browser\n\
         3. No build steps required\n\n\
         ## Usage\n\
         Open the application in your browser and follow the on-screen instructions.\n\n\
         ## License\n\
         MIT License\n"
    )
}
