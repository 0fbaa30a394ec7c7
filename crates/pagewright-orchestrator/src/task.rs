//! Task, round and evaluation data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{PagewrightError, Result};

/// Path every generated app must contain.
pub const ROOT_PAGE: &str = "index.html";

/// Repository path to full text content, ordered by path.
pub type FileSet = BTreeMap<String, String>;

const TASK_NAME_PATTERN: &str = r"^[A-Za-z0-9._-]{1,100}$";

/// A named file accompanying a task, usually a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name as the brief refers to it.
    pub name: String,
    /// `data:` URI or plain URL.
    pub url: String,
}

/// An inbound request to build or revise an app.
///
/// Immutable once accepted; the worker receives its own copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Requester identity, echoed to the evaluator.
    pub email: String,
    /// Shared secret.
    pub secret: String,
    /// Task identifier; also the repository name.
    pub task: String,
    /// 1-based revision number.
    pub round: u32,
    /// Opaque value echoed to the evaluator.
    pub nonce: String,
    /// Natural-language description of the app or the change.
    pub brief: String,
    /// Checks the evaluator will run against the deployed app.
    #[serde(default)]
    pub checks: Vec<String>,
    /// Callback URL for the evaluation record.
    pub evaluation_url: String,
    /// Files accompanying the brief.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .field("task", &self.task)
            .field("round", &self.round)
            .field("nonce", &self.nonce)
            .field("brief", &self.brief)
            .field("checks", &self.checks)
            .field("evaluation_url", &self.evaluation_url)
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl TaskRequest {
    /// Checks the semantic constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `PagewrightError::InvalidRequest` naming the first offending
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.round == 0 {
            return Err(PagewrightError::invalid_request(
                "round",
                "must be greater than or equal to 1",
            ));
        }

        if !is_valid_repository_name(&self.task) {
            return Err(PagewrightError::invalid_request(
                "task",
                "must be 1-100 letters, digits, '.', '-' or '_' and usable as a repository name",
            ));
        }

        let callback_ok = Url::parse(&self.evaluation_url)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
            .unwrap_or(false);
        if !callback_ok {
            return Err(PagewrightError::invalid_request(
                "evaluation_url",
                "must be an absolute http or https URL",
            ));
        }

        if let Some(index) = self.attachments.iter().position(|a| a.name.trim().is_empty()) {
            return Err(PagewrightError::invalid_request(
                format!("attachments.{index}.name"),
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Whether this round builds a fresh repository.
    pub const fn is_first_round(&self) -> bool {
        self.round == 1
    }

    /// Names of the attached files.
    pub fn attachment_names(&self) -> Vec<String> {
        self.attachments.iter().map(|a| a.name.clone()).collect()
    }
}

/// Whether `name` can be used verbatim as a GitHub repository name.
pub fn is_valid_repository_name(name: &str) -> bool {
    if name == "." || name == ".." {
        return false;
    }
    Regex::new(TASK_NAME_PATTERN).is_ok_and(|re| re.is_match(name))
}

/// The durable summary of one completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number.
    pub round: u32,
    /// Brief of that round.
    pub brief: String,
    /// Checks of that round.
    #[serde(default)]
    pub checks: Vec<String>,
    /// Attachment names of that round.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// When the round's files were committed.
    pub completed_at: DateTime<Utc>,
}

impl RoundRecord {
    /// Captures the parts of a request later rounds need.
    pub fn from_request(request: &TaskRequest) -> Self {
        Self {
            round: request.round,
            brief: request.brief.clone(),
            checks: request.checks.clone(),
            attachments: request.attachment_names(),
            completed_at: Utc::now(),
        }
    }
}

/// What the evaluator receives once a round is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Requester identity.
    pub email: String,
    /// Task identifier.
    pub task: String,
    /// Round number.
    pub round: u32,
    /// Nonce from the request.
    pub nonce: String,
    /// Repository browser URL.
    pub repo_url: String,
    /// Commit the deployment was built from.
    pub commit_sha: String,
    /// Public site URL.
    pub pages_url: String,
}

impl EvaluationRecord {
    /// Builds the record for a completed request.
    pub fn new(
        request: &TaskRequest,
        repo_url: impl Into<String>,
        commit_sha: impl Into<String>,
        pages_url: impl Into<String>,
    ) -> Self {
        Self {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            repo_url: repo_url.into(),
            commit_sha: commit_sha.into(),
            pages_url: pages_url.into(),
        }
    }
}

/// Returns at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}
