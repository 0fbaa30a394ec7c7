//! GitHub REST client for Pagewright.
//!
//! This module provides [`GithubClient`], a [`HostingPlatform`] backed by the
//! GitHub REST API through `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    FileWrite, GithubError, HostingPlatform, NewRepository, PagesSource, RemoteFile, Repository,
};

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = concat!("pagewright/", env!("CARGO_PKG_VERSION"));

/// Options for connecting to the GitHub API.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use pagewright_github::{GithubClient, GithubClientOptions};
///
/// # fn example() -> Result<(), pagewright_github::GithubError> {
/// let options = GithubClientOptions::new("ghp_token", "octocat")
///     .with_timeout(Duration::from_secs(60));
/// let client = GithubClient::new(options)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GithubClientOptions {
    /// Personal access token with `repo` and `pages` scopes.
    pub token: String,
    /// Account that owns the published repositories.
    pub account: String,
    /// API root; override for GitHub Enterprise or tests.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl GithubClientOptions {
    /// Creates options for the public GitHub API.
    #[must_use]
    pub fn new(token: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            account: account.into(),
            base_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Points the client at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// GitHub-backed [`HostingPlatform`].
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    base_url: String,
    account: String,
}

impl GithubClient {
    /// Builds a client with authentication and API version headers preset.
    ///
    /// # Errors
    ///
    /// Returns [`GithubError::Setup`] if the token cannot be used as a header
    /// value or the HTTP client fails to initialize.
    pub fn new(options: GithubClientOptions) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", options.token)).map_err(|_| {
            GithubError::Setup("token contains characters not allowed in a header".to_string())
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(options.user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| GithubError::Setup(e.to_string()))?;

        debug!(base_url = %options.base_url, account = %options.account, "GitHub client ready");

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            account: options.account,
        })
    }

    fn repo_endpoint(&self, repo: &str, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.base_url,
            self.account,
            urlencoding::encode(repo),
            suffix
        )
    }

    fn contents_endpoint(&self, repo: &str, path: &str) -> String {
        self.repo_endpoint(repo, &format!("/contents/{}", encode_path(path)))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct PagesRequest<'a> {
    source: &'a PagesSource,
}

// ============================================================================
// HostingPlatform implementation
// ============================================================================

#[async_trait]
impl HostingPlatform for GithubClient {
    fn account(&self) -> &str {
        &self.account
    }

    #[instrument(skip(self))]
    async fn get_repository(&self, name: &str) -> Result<Repository, GithubError> {
        let response = self
            .http
            .get(self.repo_endpoint(name, ""))
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, name).await?;
        response.json().await.map_err(transport_error)
    }

    #[instrument(skip(self, repo), fields(name = %repo.name))]
    async fn create_repository(&self, repo: &NewRepository) -> Result<Repository, GithubError> {
        let response = self
            .http
            .post(format!("{}/user/repos", self.base_url))
            .json(repo)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, &repo.name).await?;
        let created: Repository = response.json().await.map_err(transport_error)?;
        debug!(url = %created.html_url, "Repository created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_file(&self, repo: &str, path: &str) -> Result<RemoteFile, GithubError> {
        let response = self
            .http
            .get(self.contents_endpoint(repo, path))
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, path).await?;
        let body: ContentResponse = response.json().await.map_err(transport_error)?;

        let content = match (body.encoding.as_deref(), body.content) {
            (Some("base64"), Some(encoded)) => decode_content(&encoded)?,
            (_, None) => Vec::new(),
            (encoding, Some(_)) => {
                return Err(GithubError::Decode(format!(
                    "unsupported content encoding {encoding:?} for '{path}'"
                )));
            }
        };

        Ok(RemoteFile {
            path: body.path,
            sha: body.sha,
            content,
        })
    }

    #[instrument(skip(self, write), fields(path = %write.path, replacing = write.version.is_some()))]
    async fn put_file(&self, repo: &str, write: &FileWrite) -> Result<String, GithubError> {
        let request = PutContentRequest {
            message: &write.message,
            content: STANDARD.encode(&write.content),
            sha: write.version.as_deref(),
        };
        let response = self
            .http
            .put(self.contents_endpoint(repo, &write.path))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, &write.path).await?;
        let body: PutContentResponse = response.json().await.map_err(transport_error)?;
        debug!(commit = %body.commit.sha, "File committed");
        Ok(body.commit.sha)
    }

    #[instrument(skip(self))]
    async fn list_files(&self, repo: &str) -> Result<Vec<String>, GithubError> {
        let response = self
            .http
            .get(self.repo_endpoint(repo, "/git/trees/HEAD?recursive=1"))
            .send()
            .await
            .map_err(transport_error)?;

        // An empty repository has no HEAD to resolve.
        if matches!(
            response.status(),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND
        ) {
            debug!("Repository has no commits yet");
            return Ok(Vec::new());
        }

        let response = ensure_success(response, repo).await?;
        let body: TreeResponse = response.json().await.map_err(transport_error)?;
        if body.truncated {
            warn!(repo, "Tree listing truncated by GitHub; some files are missing");
        }

        Ok(body
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect())
    }

    #[instrument(skip(self))]
    async fn latest_commit(&self, repo: &str) -> Result<String, GithubError> {
        let response = self
            .http
            .get(self.repo_endpoint(repo, "/commits?per_page=1"))
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, repo).await?;
        let commits: Vec<CommitRef> = response.json().await.map_err(transport_error)?;
        commits
            .into_iter()
            .next()
            .map(|commit| commit.sha)
            .ok_or_else(|| GithubError::NotFound(format!("commits of '{repo}'")))
    }

    #[instrument(skip(self, source), fields(branch = %source.branch, path = %source.path))]
    async fn create_pages_site(
        &self,
        repo: &str,
        source: &PagesSource,
    ) -> Result<(), GithubError> {
        let response = self
            .http
            .post(self.repo_endpoint(repo, "/pages"))
            .json(&PagesRequest { source })
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response, repo).await?;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Percent-encodes each segment of a repository path, keeping separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decodes a contents-API payload, which GitHub wraps at 60 columns.
fn decode_content(encoded: &str) -> Result<Vec<u8>, GithubError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| GithubError::Decode(format!("invalid base64 content: {e}")))
}

async fn ensure_success(response: Response, resource: &str) -> Result<Response, GithubError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body).map_or(body, |m| m.message);
    Err(classify_status(status, resource, message))
}

fn classify_status(status: StatusCode, resource: &str, message: String) -> GithubError {
    match status {
        StatusCode::NOT_FOUND => GithubError::NotFound(resource.to_string()),
        StatusCode::CONFLICT => GithubError::Conflict(message),
        // GitHub reports a missing or stale blob SHA as 422 on the contents API.
        StatusCode::UNPROCESSABLE_ENTITY if message.contains("sha") => {
            GithubError::Conflict(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GithubError::Unauthorized(message),
        _ => GithubError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

fn transport_error(error: reqwest::Error) -> GithubError {
    if error.is_decode() {
        GithubError::Decode(error.to_string())
    } else {
        GithubError::Transport(error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use axum::{
        http::HeaderMap as AxumHeaders,
        routing::{get, post, put},
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use super::*;

    async fn spawn_fake_github(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: &str) -> GithubClient {
        GithubClient::new(GithubClientOptions::new("t0ken", "octo").with_base_url(base_url))
            .unwrap()
    }

    // ------------------------------------------------------------------------
    // Pure helpers
    // ------------------------------------------------------------------------

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("index.html"), "index.html");
        assert_eq!(encode_path("assets/my file.js"), "assets/my%20file.js");
    }

    #[test]
    fn test_decode_content_ignores_line_wrapping() {
        let decoded = decode_content("PGh0bWw+\nPC9odG1sPg==\n").unwrap();
        assert_eq!(decoded, b"<html></html>".to_vec());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::NOT_FOUND, "demo", String::new()).is_not_found());
        assert!(classify_status(StatusCode::CONFLICT, "demo", "busy".into()).is_conflict());
        assert!(classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "index.html",
            "Invalid request.\n\n\"sha\" wasn't supplied.".into()
        )
        .is_conflict());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "demo", "name exists".into()),
            GithubError::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "demo", "no scope".into()),
            GithubError::Unauthorized(_)
        ));
    }

    #[test]
    fn test_rejects_token_with_newline() {
        let result = GithubClient::new(GithubClientOptions::new("bad\ntoken", "octo"));
        assert!(matches!(result, Err(GithubError::Setup(_))));
    }

    // ------------------------------------------------------------------------
    // Against a fake API
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_repository_not_found() {
        let router = Router::new().route(
            "/repos/:owner/:repo",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "message": "Not Found" })),
                )
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let err = client.get_repository("demo").await.unwrap_err();
        assert_eq!(err, GithubError::NotFound("demo".to_string()));
    }

    #[tokio::test]
    async fn test_get_repository_sends_token() {
        let router = Router::new().route(
            "/repos/:owner/:repo",
            get(|headers: AxumHeaders| async move {
                let authorized = headers
                    .get("authorization")
                    .is_some_and(|v| v == "Bearer t0ken");
                if !authorized {
                    return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" })));
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "name": "demo",
                        "full_name": "octo/demo",
                        "html_url": "https://github.com/octo/demo",
                        "default_branch": "main",
                        "private": false
                    })),
                )
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let repo = client.get_repository("demo").await.unwrap();
        assert_eq!(repo.full_name, "octo/demo");
        assert_eq!(repo.html_url, "https://github.com/octo/demo");
        assert_eq!(repo.default_branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_get_file_decodes_content() {
        let router = Router::new().route(
            "/repos/:owner/:repo/contents/*path",
            get(|| async {
                Json(json!({
                    "type": "file",
                    "path": "index.html",
                    "sha": "blob1",
                    "encoding": "base64",
                    "content": "PGh0bWw+\nPC9odG1sPg==\n"
                }))
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let file = client.get_file("demo", "index.html").await.unwrap();
        assert_eq!(file.sha, "blob1");
        assert_eq!(file.text(), Some("<html></html>"));
    }

    #[tokio::test]
    async fn test_put_file_sends_version_token() {
        let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        let router = Router::new().route(
            "/repos/:owner/:repo/contents/*path",
            put(move |Json(body): Json<Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().await = Some(body);
                    Json(json!({
                        "content": { "sha": "blob2" },
                        "commit": { "sha": "c0ffee" }
                    }))
                }
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let write = FileWrite::create("index.html", "hi", "Round 1: demo").replacing("blob1");
        let commit = client.put_file("demo", &write).await.unwrap();
        assert_eq!(commit, "c0ffee");

        let body = captured.lock().await.clone().unwrap();
        assert_eq!(body["message"], "Round 1: demo");
        assert_eq!(body["content"], STANDARD.encode("hi"));
        assert_eq!(body["sha"], "blob1");
    }

    #[tokio::test]
    async fn test_put_file_omits_sha_for_new_files() {
        let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        let router = Router::new().route(
            "/repos/:owner/:repo/contents/*path",
            put(move |Json(body): Json<Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().await = Some(body);
                    (
                        StatusCode::CREATED,
                        Json(json!({ "content": { "sha": "b" }, "commit": { "sha": "c1" } })),
                    )
                }
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        client
            .put_file("demo", &FileWrite::create("LICENSE", "MIT", "Add MIT License"))
            .await
            .unwrap();

        let body = captured.lock().await.clone().unwrap();
        assert!(body.get("sha").is_none());
    }

    #[tokio::test]
    async fn test_list_files_on_empty_repository() {
        let router = Router::new().route(
            "/repos/:owner/:repo/git/trees/:tree",
            get(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "message": "Git Repository is empty." })),
                )
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let files = client.list_files("demo").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_list_files_keeps_only_blobs() {
        let router = Router::new().route(
            "/repos/:owner/:repo/git/trees/:tree",
            get(|| async {
                Json(json!({
                    "sha": "t",
                    "truncated": false,
                    "tree": [
                        { "path": "index.html", "type": "blob" },
                        { "path": "assets", "type": "tree" },
                        { "path": "assets/app.js", "type": "blob" }
                    ]
                }))
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let files = client.list_files("demo").await.unwrap();
        assert_eq!(files, vec!["index.html", "assets/app.js"]);
    }

    #[tokio::test]
    async fn test_latest_commit_takes_newest() {
        let router = Router::new().route(
            "/repos/:owner/:repo/commits",
            get(|| async { Json(json!([{ "sha": "newest" }, { "sha": "older" }])) }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        assert_eq!(client.latest_commit("demo").await.unwrap(), "newest");
    }

    #[tokio::test]
    async fn test_pages_already_enabled_is_conflict() {
        let router = Router::new().route(
            "/repos/:owner/:repo/pages",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "message": "GitHub Pages is already enabled." })),
                )
            }),
        );
        let client = client_for(&spawn_fake_github(router).await);

        let err = client
            .create_pages_site("demo", &PagesSource::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("already enabled"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client = client_for(&format!("http://{addr}"));

        let err = client.get_repository("demo").await.unwrap_err();
        assert!(err.is_transient(), "expected transport error, got {err:?}");
    }
}
