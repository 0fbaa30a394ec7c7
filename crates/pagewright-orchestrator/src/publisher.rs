//! Repository publishing.
//!
//! [`RepositoryPublisher`] turns round-level operations (ensure a repository,
//! upsert files, enable Pages, persist round history) into calls on a
//! [`HostingPlatform`]. Every platform call runs under the shared
//! [`RetryPolicy`]; writes additionally retry on stale version tokens.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use pagewright_github::{FileWrite, GithubError, HostingPlatform, NewRepository, PagesSource};
use tracing::{debug, info, instrument, warn};

use crate::error::{PagewrightError, Result};
use crate::history::{is_history_path, RoundHistory, HISTORY_PATH};
use crate::retry::RetryPolicy;
use crate::task::{FileSet, RoundRecord};

/// Path of the license file.
pub const LICENSE_PATH: &str = "LICENSE";

/// Attempts per file write when the version token goes stale.
pub const WRITE_ATTEMPTS: u32 = 3;

/// Round-level publishing operations.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Account owning every published repository.
    fn account(&self) -> &str;

    /// Browser URL of a repository under [`Publisher::account`].
    fn repository_url(&self, repo: &str) -> String {
        pagewright_github::repository_url(self.account(), repo)
    }

    /// Returns the URL of `name`, creating the repository if needed.
    async fn ensure_repository(&self, name: &str, description: &str) -> Result<String>;

    /// Creates or replaces one file in its own commit.
    async fn upsert_file(&self, repo: &str, path: &str, content: &str, message: &str)
        -> Result<()>;

    /// Creates or refreshes the MIT license.
    async fn upsert_license(&self, repo: &str) -> Result<()>;

    /// SHA of the newest commit on the default branch.
    async fn latest_commit_id(&self, repo: &str) -> Result<String>;

    /// Enables static hosting and returns the public site URL.
    ///
    /// Failures other than "already enabled" are logged, never returned.
    async fn enable_static_site(&self, repo: &str) -> Result<String>;

    /// Appends or replaces the record for `record.round`.
    async fn store_round_record(&self, repo: &str, record: &RoundRecord) -> Result<()>;

    /// Records with `round <= upto_round`, oldest first.
    async fn fetch_round_records(&self, repo: &str, upto_round: u32) -> Result<Vec<RoundRecord>>;

    /// Every UTF-8 file in the repository outside the metadata directory.
    async fn fetch_all_files(&self, repo: &str) -> Result<FileSet>;
}

/// MIT license text for `holder`.
pub fn mit_license(year: i32, holder: &str) -> String {
    format!(
        "MIT License\n\
         \n\
         Copyright (c) {year} {holder}\n\
         \n\
         Permission is hereby granted, free of charge, to any person obtaining a copy\n\
         of this software and associated documentation files (the \"Software\"), to deal\n\
         in the Software without restriction, including without limitation the rights\n\
         to use, copy, modify, merge, publish, distribute, sublicense, and/or sell\n\
         copies of the Software, and to permit persons to whom the Software is\n\
         furnished to do so, subject to the following conditions:\n\
         \n\
         The above copyright notice and this permission notice shall be included in all\n\
         copies or substantial portions of the Software.\n\
         \n\
         THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR\n\
         IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,\n\
         FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE\n\
         AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER\n\
         LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,\n\
         OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE\n\
         SOFTWARE.\n"
    )
}

/// Commit messages for a file that is being created or replaced.
struct CommitMessages<'a> {
    create: &'a str,
    update: &'a str,
}

/// [`Publisher`] backed by a [`HostingPlatform`].
#[derive(Clone)]
pub struct RepositoryPublisher {
    platform: Arc<dyn HostingPlatform>,
    retry: RetryPolicy,
    pages: PagesSource,
}

impl RepositoryPublisher {
    /// Publishes through `platform`, retrying transient failures per `retry`.
    pub fn new(platform: Arc<dyn HostingPlatform>, retry: RetryPolicy) -> Self {
        Self {
            platform,
            retry,
            pages: PagesSource::default(),
        }
    }

    /// Current blob SHA of `path`, or `None` when the file does not exist.
    async fn current_version(&self, repo: &str, path: &str) -> Result<Option<String>> {
        match self
            .retry
            .run("get_file", || self.platform.get_file(repo, path))
            .await
        {
            Ok(file) => Ok(Some(file.sha)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `content` at `path`, re-reading the version token on conflict.
    async fn write_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        messages: &CommitMessages<'_>,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            let version = self.current_version(repo, path).await?;
            let message = if version.is_some() {
                messages.update
            } else {
                messages.create
            };
            let mut write = FileWrite::create(path, content, message);
            write.version = version;

            match self
                .retry
                .run("put_file", || self.platform.put_file(repo, &write))
                .await
            {
                Ok(commit) => {
                    debug!(repo, path, commit = %commit, "File committed");
                    return Ok(());
                }
                Err(e) if e.is_conflict() && attempt < WRITE_ATTEMPTS => {
                    warn!(repo, path, attempt, error = %e, "Stale version token, re-reading file");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read_history(&self, repo: &str) -> Result<Option<(String, RoundHistory)>> {
        match self
            .retry
            .run("get_file", || self.platform.get_file(repo, HISTORY_PATH))
            .await
        {
            Ok(file) => {
                let text = file.text().ok_or_else(|| {
                    PagewrightError::history_corrupted(repo, "history is not UTF-8")
                })?;
                Ok(Some((file.sha.clone(), RoundHistory::parse(repo, text)?)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Publisher for RepositoryPublisher {
    fn account(&self) -> &str {
        self.platform.account()
    }

    #[instrument(skip(self, description))]
    async fn ensure_repository(&self, name: &str, description: &str) -> Result<String> {
        match self
            .retry
            .run("get_repository", || self.platform.get_repository(name))
            .await
        {
            Ok(existing) => {
                warn!(repo = name, "Repository already exists, reusing it");
                return Ok(existing.html_url);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let settings = NewRepository::new(name).with_description(description);
        let created = self
            .retry
            .run("create_repository", || self.platform.create_repository(&settings))
            .await?;
        info!(repo = name, url = %created.html_url, "Repository created");
        Ok(created.html_url)
    }

    #[instrument(skip(self, content, message), fields(bytes = content.len()))]
    async fn upsert_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()> {
        let messages = CommitMessages {
            create: message,
            update: message,
        };
        self.write_file(repo, path, content.as_bytes(), &messages)
            .await
    }

    #[instrument(skip(self))]
    async fn upsert_license(&self, repo: &str) -> Result<()> {
        let text = mit_license(Utc::now().year(), self.account());
        let messages = CommitMessages {
            create: "Add MIT License",
            update: "Update MIT License",
        };
        self.write_file(repo, LICENSE_PATH, text.as_bytes(), &messages)
            .await
    }

    #[instrument(skip(self))]
    async fn latest_commit_id(&self, repo: &str) -> Result<String> {
        Ok(self
            .retry
            .run("latest_commit", || self.platform.latest_commit(repo))
            .await?)
    }

    #[instrument(skip(self))]
    async fn enable_static_site(&self, repo: &str) -> Result<String> {
        match self
            .retry
            .run("create_pages_site", || {
                self.platform.create_pages_site(repo, &self.pages)
            })
            .await
        {
            Ok(()) => info!(repo, "GitHub Pages enabled"),
            Err(e) if is_already_enabled(&e) => info!(repo, "GitHub Pages already enabled"),
            Err(e) => warn!(repo, error = %e, "Could not enable GitHub Pages"),
        }
        Ok(pagewright_github::pages_url(self.account(), repo))
    }

    #[instrument(skip(self, record), fields(round = record.round))]
    async fn store_round_record(&self, repo: &str, record: &RoundRecord) -> Result<()> {
        let message = format!("Record round {}", record.round);
        let mut attempt = 1;
        loop {
            let (version, mut history) = match self.read_history(repo).await? {
                Some((sha, history)) => (Some(sha), history),
                None => (None, RoundHistory::default()),
            };
            history.record(record.clone());

            let mut write = FileWrite::create(HISTORY_PATH, history.to_json()?, message.as_str());
            write.version = version;

            match self
                .retry
                .run("put_file", || self.platform.put_file(repo, &write))
                .await
            {
                Ok(_) => {
                    debug!(repo, rounds = history.rounds.len(), "Round history stored");
                    return Ok(());
                }
                Err(e) if e.is_conflict() && attempt < WRITE_ATTEMPTS => {
                    warn!(repo, attempt, error = %e, "Round history changed concurrently, re-reading");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self))]
    async fn fetch_round_records(&self, repo: &str, upto_round: u32) -> Result<Vec<RoundRecord>> {
        Ok(self
            .read_history(repo)
            .await?
            .map(|(_, history)| history.upto(upto_round))
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn fetch_all_files(&self, repo: &str) -> Result<FileSet> {
        self.retry
            .run("get_repository", || self.platform.get_repository(repo))
            .await
            .map_err(|e| PagewrightError::repository_unavailable(repo, e.to_string()))?;

        let paths = self
            .retry
            .run("list_files", || self.platform.list_files(repo))
            .await?;

        let mut files = FileSet::new();
        for path in paths.iter().filter(|p| !is_history_path(p)) {
            let file = self
                .retry
                .run("get_file", || self.platform.get_file(repo, path))
                .await?;
            match file.text() {
                Some(text) => {
                    files.insert(path.clone(), text.to_string());
                }
                None => debug!(repo, path = %path, "Skipping binary file"),
            }
        }
        info!(repo, files = files.len(), "Fetched repository files");
        Ok(files)
    }
}

fn is_already_enabled(error: &GithubError) -> bool {
    match error {
        GithubError::Conflict(_) => true,
        GithubError::Rejected { message, .. } => message.to_lowercase().contains("already enabled"),
        _ => false,
    }
}
