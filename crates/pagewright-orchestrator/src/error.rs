//! Error types for the Pagewright orchestrator.
//!
//! This module defines the error hierarchy for every stage of a round:
//! configuration, request validation, generation, publishing and
//! notification.

use pagewright_github::GithubError;

/// A specialized `Result` type for Pagewright operations.
pub type Result<T> = std::result::Result<T, PagewrightError>;

/// Errors that can occur while accepting or executing a round.
///
/// Variants are grouped by subsystem and carry actionable suggestions where
/// the operator can do something about them.
#[derive(Debug, thiserror::Error)]
pub enum PagewrightError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A required setting is absent from the environment.
    #[error("Missing required setting '{key}'\n\nSuggestion: Export {key} or add it to .env.local")]
    ConfigMissing {
        /// Environment key that was looked up.
        key: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The shared secret in a task request did not match.
    #[error("Invalid secret")]
    Unauthorized,

    /// A task request is structurally valid JSON but semantically unusable.
    #[error("Invalid task request field '{field}': {message}")]
    InvalidRequest {
        /// Offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The background worker has stopped and cannot take new rounds.
    #[error("Worker queue is closed\n\nSuggestion: Restart the service")]
    WorkerUnavailable,

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// The generator returned a file set without `index.html`.
    #[error("Generated app for round {round} has no index.html\n\nSuggestion: Resubmit the round; the model ignored the output format")]
    MissingRootPage {
        /// Round that produced the incomplete output.
        round: u32,
    },

    /// The generator returned output that is not a path-to-content map.
    #[error("Malformed generation output: {message}")]
    MalformedGeneration {
        /// Why the output was rejected.
        message: String,
    },

    /// The language model API returned an error.
    #[error("LLM API error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    LlmApiError {
        /// The kind of API error (e.g., rate limit, authentication, server).
        kind: LlmErrorKind,
        /// Detailed error message from the API.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Publishing Errors
    // ========================================================================
    /// The hosting platform rejected an operation.
    #[error("Hosting platform error: {0}")]
    Platform(#[from] GithubError),

    /// A later round could not read the repository built by earlier rounds.
    #[error("Repository '{repo}' is unavailable: {message}\n\nSuggestion: Round 1 must complete before later rounds are submitted")]
    RepositoryUnavailable {
        /// Repository name.
        repo: String,
        /// Underlying failure.
        message: String,
    },

    /// The stored round history could not be parsed.
    #[error("Corrupted round history in '{repo}': {message}\n\nSuggestion: Fix or delete .pagewright/rounds.json in the repository")]
    RoundHistoryCorrupted {
        /// Repository name.
        repo: String,
        /// Description of the corruption.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// A remote call failed before producing a response.
    #[error("Transport error calling {service}: {message}")]
    Transport {
        /// Which collaborator was being called.
        service: String,
        /// Description of the failure.
        message: String,
    },

    /// The evaluation callback answered with an error status.
    #[error("Evaluation endpoint {url} answered {status}")]
    CallbackRejected {
        /// Callback URL.
        url: String,
        /// HTTP status returned.
        status: u16,
    },

    /// The evaluation callback could not be delivered within the overall budget.
    #[error("Evaluation notification to {url} gave up after {timeout_secs}s\n\nSuggestion: Check that the evaluation endpoint is reachable")]
    NotificationTimeout {
        /// Callback URL.
        url: String,
        /// Budget in seconds.
        timeout_secs: u64,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of LLM API errors for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check LLM_API_KEY",
            Self::RateLimit => "Wait and resubmit, or reduce request frequency",
            Self::Server => "Resubmit later; the LLM service may be experiencing issues",
            Self::Network => "Check network access to LLM_BASE_URL",
            Self::Other => "Check the LLM provider's status page",
        }
    }

    /// Classifies an HTTP status returned by the LLM API.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl PagewrightError {
    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ConfigMissing` error.
    #[must_use]
    pub fn config_missing(key: impl Into<String>) -> Self {
        Self::ConfigMissing { key: key.into() }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new `MalformedGeneration` error.
    #[must_use]
    pub fn malformed_generation(message: impl Into<String>) -> Self {
        Self::MalformedGeneration {
            message: message.into(),
        }
    }

    /// Creates a new `LlmApiError` with automatic suggestion based on error kind.
    #[must_use]
    pub fn llm_api_error(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::LlmApiError {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `RepositoryUnavailable` error.
    #[must_use]
    pub fn repository_unavailable(repo: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RepositoryUnavailable {
            repo: repo.into(),
            message: message.into(),
        }
    }

    /// Creates a new `RoundHistoryCorrupted` error.
    #[must_use]
    pub fn history_corrupted(repo: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RoundHistoryCorrupted {
            repo: repo.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    ///
    /// Only failures that never reached the remote application qualify,
    /// plus error statuses from the evaluation callback.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::CallbackRejected { .. }
            | Self::LlmApiError {
                kind: LlmErrorKind::Network,
                ..
            } => true,
            Self::Platform(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if this error should stop the process rather than a
    /// single round.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing { .. }
                | Self::ConfigValidationError { .. }
                | Self::LlmApiError {
                    kind: LlmErrorKind::Authentication,
                    ..
                }
                | Self::Platform(GithubError::Unauthorized(_) | GithubError::Setup(_))
        )
    }
}
