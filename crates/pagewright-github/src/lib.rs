//! Pagewright GitHub Integration
//!
//! Repository, contents and Pages operations against the GitHub REST API.
//!
//! The [`HostingPlatform`] trait is the seam the orchestrator publishes
//! through. [`GithubClient`] implements it over `reqwest`; [`MemoryPlatform`]
//! implements it in-process for tests and local dry runs.

mod client;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{GithubClient, GithubClientOptions, DEFAULT_API_URL};
pub use memory::MemoryPlatform;

/// Errors returned by hosting platform operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GithubError {
    /// The repository, file or commit does not exist.
    ///
    /// Callers treat this as a branch signal (create instead of update),
    /// not as a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write was based on a stale version token, or the resource
    /// already exists in a conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credentials were rejected or lack the required scope.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The platform rejected the request for any other reason.
    #[error("GitHub rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the API.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request never produced a response (connect failure, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The client could not be constructed.
    #[error("invalid client setup: {0}")]
    Setup(String),
}

impl GithubError {
    /// Returns `true` for the not-found signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` when a write lost an optimistic-concurrency race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if the error is a transport failure worth retrying.
    ///
    /// Application-level rejections are never transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A repository as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Short repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Browser URL of the repository.
    pub html_url: String,
    /// Default branch, if the repository has any commits.
    pub default_branch: Option<String>,
}

/// Settings for a repository that is about to be created.
///
/// Defaults match what generated apps need: public, issues on, wiki off,
/// downloads on, and no initial commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRepository {
    /// Repository name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Whether the repository is private.
    pub private: bool,
    /// Enable the issue tracker.
    pub has_issues: bool,
    /// Enable the wiki.
    pub has_wiki: bool,
    /// Enable downloads.
    pub has_downloads: bool,
    /// Create an initial commit with an empty README.
    pub auto_init: bool,
}

impl NewRepository {
    /// Creates settings for a public repository with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            private: false,
            has_issues: true,
            has_wiki: false,
            has_downloads: true,
            auto_init: false,
        }
    }

    /// Sets the repository description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A file read from a repository together with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Repository-relative path.
    pub path: String,
    /// Blob SHA; required to update the file.
    pub sha: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
}

impl RemoteFile {
    /// Returns the content as UTF-8 text, or `None` for binary blobs.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// A single-file commit.
///
/// `version` carries the blob SHA of the file being replaced. Leaving it
/// empty asserts the file does not exist yet; the platform answers with a
/// conflict when either assumption is wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    /// Repository-relative path.
    pub path: String,
    /// New file bytes.
    pub content: Vec<u8>,
    /// Commit message.
    pub message: String,
    /// Version token of the file being replaced.
    pub version: Option<String>,
}

impl FileWrite {
    /// Creates a write for a file that does not exist yet.
    #[must_use]
    pub fn create(
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            message: message.into(),
            version: None,
        }
    }

    /// Marks the write as replacing the file with the given blob SHA.
    #[must_use]
    pub fn replacing(mut self, sha: impl Into<String>) -> Self {
        self.version = Some(sha.into());
        self
    }
}

/// Branch and folder served by the static site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagesSource {
    /// Branch to publish.
    pub branch: String,
    /// Folder within the branch (`/` or `/docs`).
    pub path: String,
}

impl Default for PagesSource {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            path: "/".to_string(),
        }
    }
}

/// Operations a source-hosting platform must offer to publish generated apps.
///
/// Every repository argument is a short name; the owning account is fixed
/// per implementation and reported by [`HostingPlatform::account`].
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// The account that owns every repository this platform touches.
    fn account(&self) -> &str;

    /// Looks up a repository. Missing repositories yield [`GithubError::NotFound`].
    async fn get_repository(&self, name: &str) -> Result<Repository, GithubError>;

    /// Creates a repository under the account.
    async fn create_repository(&self, repo: &NewRepository) -> Result<Repository, GithubError>;

    /// Reads a file and its version token.
    async fn get_file(&self, repo: &str, path: &str) -> Result<RemoteFile, GithubError>;

    /// Commits a single file and returns the new commit SHA.
    async fn put_file(&self, repo: &str, write: &FileWrite) -> Result<String, GithubError>;

    /// Lists every file path on the default branch. Empty repositories
    /// yield an empty list.
    async fn list_files(&self, repo: &str) -> Result<Vec<String>, GithubError>;

    /// Returns the SHA of the newest commit on the default branch.
    async fn latest_commit(&self, repo: &str) -> Result<String, GithubError>;

    /// Turns on static-site hosting. An already-enabled site yields
    /// [`GithubError::Conflict`].
    async fn create_pages_site(&self, repo: &str, source: &PagesSource)
        -> Result<(), GithubError>;
}

/// Browser URL of `account/name` on GitHub.
#[must_use]
pub fn repository_url(account: &str, name: &str) -> String {
    format!("https://github.com/{account}/{name}")
}

/// Public GitHub Pages URL of `account/name`.
#[must_use]
pub fn pages_url(account: &str, name: &str) -> String {
    format!("https://{account}.github.io/{name}/")
}
