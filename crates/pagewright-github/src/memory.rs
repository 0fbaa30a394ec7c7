//! In-process hosting platform.
//!
//! [`MemoryPlatform`] keeps repositories, files and commit history in memory
//! and follows the same version-token rules as GitHub. It also supports
//! failure injection so callers can exercise retry and conflict handling.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{
    pages_url, repository_url, FileWrite, GithubError, HostingPlatform, NewRepository,
    PagesSource, RemoteFile, Repository,
};

#[derive(Debug, Clone)]
struct StoredFile {
    sha: String,
    content: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredRepository {
    repository: Repository,
    description: String,
    files: BTreeMap<String, StoredFile>,
    commits: Vec<String>,
    pages: Option<PagesSource>,
}

#[derive(Debug, Default)]
struct PlatformState {
    repositories: BTreeMap<String, StoredRepository>,
    sequence: u64,
    created: usize,
    transient_failures: u32,
    write_conflicts: u32,
    reject_pages: bool,
}

impl PlatformState {
    fn next_sha(&mut self) -> String {
        self.sequence += 1;
        format!("{:040x}", self.sequence)
    }

    /// Consumes one injected transport failure, if any remain.
    fn take_failure(&mut self) -> Result<(), GithubError> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(GithubError::Transport("injected connection reset".to_string()));
        }
        Ok(())
    }

    fn repository_mut(&mut self, name: &str) -> Result<&mut StoredRepository, GithubError> {
        self.repositories
            .get_mut(name)
            .ok_or_else(|| GithubError::NotFound(name.to_string()))
    }

    fn repository(&self, name: &str) -> Result<&StoredRepository, GithubError> {
        self.repositories
            .get(name)
            .ok_or_else(|| GithubError::NotFound(name.to_string()))
    }
}

/// A [`HostingPlatform`] that lives entirely in memory.
///
/// # Example
///
/// ```
/// use pagewright_github::{HostingPlatform, MemoryPlatform};
///
/// let platform = MemoryPlatform::new("octo").with_repository("demo");
/// assert_eq!(platform.account(), "octo");
/// assert_eq!(platform.repositories_created(), 0);
/// ```
#[derive(Debug)]
pub struct MemoryPlatform {
    account: String,
    state: Mutex<PlatformState>,
}

impl MemoryPlatform {
    /// Creates an empty platform for the given account.
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Seeds an existing, empty repository.
    #[must_use]
    pub fn with_repository(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            let stored = self.stored_repository(name, String::new());
            state.repositories.insert(name.to_string(), stored);
        }
        self
    }

    /// Makes the next `count` operations fail with a transport error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Makes the next `count` file writes fail with a version conflict.
    pub fn inject_write_conflicts(&self, count: u32) {
        self.lock().write_conflicts = count;
    }

    /// Makes every Pages request fail with a rejection.
    pub fn reject_pages(&self, reject: bool) {
        self.lock().reject_pages = reject;
    }

    /// Number of repositories created through [`HostingPlatform::create_repository`].
    pub fn repositories_created(&self) -> usize {
        self.lock().created
    }

    /// Number of commits in a repository, or zero if it does not exist.
    pub fn commit_count(&self, repo: &str) -> usize {
        self.lock()
            .repositories
            .get(repo)
            .map_or(0, |stored| stored.commits.len())
    }

    /// File content as text, if the file exists and is UTF-8.
    pub fn file_text(&self, repo: &str, path: &str) -> Option<String> {
        let state = self.lock();
        let file = state.repositories.get(repo)?.files.get(path)?;
        String::from_utf8(file.content.clone()).ok()
    }

    /// Every path stored in a repository, sorted.
    pub fn paths(&self, repo: &str) -> Vec<String> {
        self.lock()
            .repositories
            .get(repo)
            .map(|stored| stored.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Description the repository was created with.
    pub fn description(&self, repo: &str) -> Option<String> {
        self.lock()
            .repositories
            .get(repo)
            .map(|stored| stored.description.clone())
    }

    /// Whether static-site hosting is enabled for the repository.
    pub fn pages_enabled(&self, repo: &str) -> bool {
        self.lock()
            .repositories
            .get(repo)
            .is_some_and(|stored| stored.pages.is_some())
    }

    /// Public site URL for a repository on this platform.
    pub fn site_url(&self, repo: &str) -> String {
        pages_url(&self.account, repo)
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_repository(&self, name: &str, description: String) -> StoredRepository {
        StoredRepository {
            repository: Repository {
                name: name.to_string(),
                full_name: format!("{}/{name}", self.account),
                html_url: repository_url(&self.account, name),
                default_branch: None,
            },
            description,
            files: BTreeMap::new(),
            commits: Vec::new(),
            pages: None,
        }
    }
}

#[async_trait]
impl HostingPlatform for MemoryPlatform {
    fn account(&self) -> &str {
        &self.account
    }

    async fn get_repository(&self, name: &str) -> Result<Repository, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        state.repository(name).map(|stored| stored.repository.clone())
    }

    async fn create_repository(&self, repo: &NewRepository) -> Result<Repository, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        if state.repositories.contains_key(&repo.name) {
            return Err(GithubError::Rejected {
                status: 422,
                message: "name already exists on this account".to_string(),
            });
        }

        let stored = self.stored_repository(&repo.name, repo.description.clone());
        let created = stored.repository.clone();
        state.repositories.insert(repo.name.clone(), stored);
        state.created += 1;
        Ok(created)
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<RemoteFile, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        let file = state
            .repository(repo)?
            .files
            .get(path)
            .ok_or_else(|| GithubError::NotFound(path.to_string()))?;
        Ok(RemoteFile {
            path: path.to_string(),
            sha: file.sha.clone(),
            content: file.content.clone(),
        })
    }

    async fn put_file(&self, repo: &str, write: &FileWrite) -> Result<String, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        if state.write_conflicts > 0 {
            state.write_conflicts -= 1;
            return Err(GithubError::Conflict(format!(
                "{} does not match the expected version",
                write.path
            )));
        }

        let current = state
            .repository(repo)?
            .files
            .get(&write.path)
            .map(|file| file.sha.clone());
        match (current.as_deref(), write.version.as_deref()) {
            (None, None) => {}
            (Some(existing), Some(expected)) if existing == expected => {}
            (Some(_), None) => {
                return Err(GithubError::Conflict(format!(
                    "\"sha\" wasn't supplied for existing file {}",
                    write.path
                )));
            }
            _ => {
                return Err(GithubError::Conflict(format!(
                    "{} does not match the expected version",
                    write.path
                )));
            }
        }

        let blob_sha = state.next_sha();
        let commit_sha = state.next_sha();
        let stored = state.repository_mut(repo)?;
        stored.files.insert(
            write.path.clone(),
            StoredFile {
                sha: blob_sha,
                content: write.content.clone(),
            },
        );
        stored.commits.push(commit_sha.clone());
        stored
            .repository
            .default_branch
            .get_or_insert_with(|| "main".to_string());
        Ok(commit_sha)
    }

    async fn list_files(&self, repo: &str) -> Result<Vec<String>, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        Ok(state.repository(repo)?.files.keys().cloned().collect())
    }

    async fn latest_commit(&self, repo: &str) -> Result<String, GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        state
            .repository(repo)?
            .commits
            .last()
            .cloned()
            .ok_or_else(|| GithubError::NotFound(format!("commits of '{repo}'")))
    }

    async fn create_pages_site(
        &self,
        repo: &str,
        source: &PagesSource,
    ) -> Result<(), GithubError> {
        let mut state = self.lock();
        state.take_failure()?;
        if state.reject_pages {
            return Err(GithubError::Rejected {
                status: 422,
                message: "Pages is not available for this repository".to_string(),
            });
        }

        let stored = state.repository_mut(repo)?;
        if stored.pages.is_some() {
            return Err(GithubError::Conflict(
                "GitHub Pages is already enabled.".to_string(),
            ));
        }
        stored.pages = Some(source.clone());
        Ok(())
    }
}
