//! Round execution.
//!
//! A [`RoundRunner`] takes one accepted [`TaskRequest`] through a fixed
//! sequence of [`RoundPhase`]s, from bootstrapping earlier rounds to
//! notifying the evaluator. Phases run strictly in order. Only
//! [`RoundPhase::Document`] may degrade; every other failure ends the round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::generation::{fallback_readme, AppGenerator, GenerationRequest};
use crate::history::is_history_path;
use crate::notifier::Notifier;
use crate::publisher::{Publisher, LICENSE_PATH};
use crate::task::{truncate_chars, EvaluationRecord, FileSet, RoundRecord, TaskRequest};

/// Path the README is committed to.
pub const README_PATH: &str = "README.md";

/// Grace interval between enabling Pages and notifying.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

const DESCRIPTION_BRIEF_CHARS: usize = 100;
const COMMIT_BRIEF_CHARS: usize = 50;

// ============================================================================
// Phases
// ============================================================================

/// Steps of a round, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Load history and current files (round 2 and later).
    Bootstrap,
    /// Generate the app files.
    Generate,
    /// Generate the README.
    Document,
    /// Create or locate the repository.
    PublishRepository,
    /// Upsert the license.
    License,
    /// Commit generated files and the README.
    Commit,
    /// Persist the round record and read back the commit id.
    RecordHistory,
    /// Enable the static site.
    Deploy,
    /// Wait for the site build to start.
    Settle,
    /// Deliver the evaluation record.
    Notify,
}

/// What happens when a phase fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// The round ends with the error.
    Fatal,
    /// A deterministic substitute is used and the round continues.
    DegradeWithFallback,
}

impl RoundPhase {
    /// Failure policy of this phase.
    #[must_use]
    pub const fn policy(self) -> StepPolicy {
        match self {
            Self::Document => StepPolicy::DegradeWithFallback,
            _ => StepPolicy::Fatal,
        }
    }

    /// Snake-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Generate => "generate",
            Self::Document => "document",
            Self::PublishRepository => "publish_repository",
            Self::License => "license",
            Self::Commit => "commit",
            Self::RecordHistory => "record_history",
            Self::Deploy => "deploy",
            Self::Settle => "settle",
            Self::Notify => "notify",
        }
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Executes rounds against a generator, a publisher and a notifier.
///
/// Holds no per-round state; one runner serves every request.
#[derive(Clone)]
pub struct RoundRunner {
    generator: Arc<dyn AppGenerator>,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
    settle_delay: Duration,
}

impl RoundRunner {
    /// Creates a runner with the default settle delay.
    pub fn new(
        generator: Arc<dyn AppGenerator>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            generator,
            publisher,
            notifier,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Sets the grace interval before notifying.
    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Runs one round to completion and returns what the evaluator received.
    ///
    /// # Errors
    ///
    /// Returns the first error from a fatal phase. Anything already
    /// published stays published.
    pub async fn run(&self, request: &TaskRequest) -> Result<EvaluationRecord> {
        info!(task = %request.task, round = request.round, "Starting round");
        let record = self.execute(request).await?;
        info!(
            task = %request.task,
            round = request.round,
            commit = %record.commit_sha,
            pages_url = %record.pages_url,
            "Round completed"
        );
        Ok(record)
    }

    async fn execute(&self, request: &TaskRequest) -> Result<EvaluationRecord> {
        let task = request.task.as_str();
        let round = request.round;

        let generation = if request.is_first_round() {
            GenerationRequest::first_round(request)
        } else {
            let (prior_rounds, current_files) =
                run_phase(request, RoundPhase::Bootstrap, self.bootstrap(request)).await?;
            GenerationRequest::revision(request, prior_rounds, current_files)
        };

        let mut files = run_phase(
            request,
            RoundPhase::Generate,
            self.generator.generate_app(&generation),
        )
        .await?;
        drop_reserved_paths(task, &mut files);

        let readme = self.document(request).await;
        files.insert(README_PATH.to_string(), readme);

        let repo_url = if request.is_first_round() {
            let description = format!(
                "Automated app: {}",
                truncate_chars(&request.brief, DESCRIPTION_BRIEF_CHARS)
            );
            run_phase(
                request,
                RoundPhase::PublishRepository,
                self.publisher.ensure_repository(task, &description),
            )
            .await?
        } else {
            self.publisher.repository_url(task)
        };

        run_phase(request, RoundPhase::License, self.publisher.upsert_license(task)).await?;
        run_phase(request, RoundPhase::Commit, self.commit_files(request, &files)).await?;
        let commit_sha =
            run_phase(request, RoundPhase::RecordHistory, self.record_history(request)).await?;
        let pages_url = run_phase(
            request,
            RoundPhase::Deploy,
            self.publisher.enable_static_site(task),
        )
        .await?;

        if !self.settle_delay.is_zero() {
            info!(
                task,
                round,
                phase = %RoundPhase::Settle,
                delay_secs = self.settle_delay.as_secs_f64(),
                "Waiting for the site build to start"
            );
            tokio::time::sleep(self.settle_delay).await;
        }

        let record = EvaluationRecord::new(request, repo_url, commit_sha, pages_url);
        run_phase(
            request,
            RoundPhase::Notify,
            self.notifier.send(&request.evaluation_url, &record),
        )
        .await?;
        Ok(record)
    }

    /// Prior round records and the repository's current files.
    async fn bootstrap(&self, request: &TaskRequest) -> Result<(Vec<RoundRecord>, FileSet)> {
        let task = request.task.as_str();
        let files = self.publisher.fetch_all_files(task).await?;
        let records = self
            .publisher
            .fetch_round_records(task, request.round - 1)
            .await?;
        if records.len() + 1 < request.round as usize {
            warn!(
                task,
                round = request.round,
                recorded = records.len(),
                "Round history is incomplete"
            );
        }
        Ok((records, files))
    }

    /// README text; falls back to a template when generation fails.
    async fn document(&self, request: &TaskRequest) -> String {
        info!(task = %request.task, round = request.round, phase = %RoundPhase::Document, "Entering phase");
        match self
            .generator
            .generate_readme(&request.task, &request.brief, request.round)
            .await
        {
            Ok(readme) => readme,
            Err(e) => {
                warn!(
                    task = %request.task,
                    round = request.round,
                    error = %e,
                    "README generation failed, using fallback"
                );
                fallback_readme(&request.task, &request.brief)
            }
        }
    }

    async fn commit_files(&self, request: &TaskRequest, files: &FileSet) -> Result<()> {
        let message = format!(
            "Round {}: {}",
            request.round,
            truncate_chars(&request.brief, COMMIT_BRIEF_CHARS)
        );
        for (path, content) in files {
            self.publisher
                .upsert_file(&request.task, path, content, &message)
                .await?;
        }
        Ok(())
    }

    /// Stores the round record and returns the resulting branch tip.
    async fn record_history(&self, request: &TaskRequest) -> Result<String> {
        self.publisher
            .store_round_record(&request.task, &RoundRecord::from_request(request))
            .await?;
        self.publisher.latest_commit_id(&request.task).await
    }
}

/// Runs a fatal phase, logging entry and failure.
async fn run_phase<T, F>(request: &TaskRequest, phase: RoundPhase, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    info!(task = %request.task, round = request.round, phase = %phase, "Entering phase");
    step.await.inspect_err(|e| {
        error!(
            task = %request.task,
            round = request.round,
            phase = %phase,
            error = %e,
            "Round failed"
        );
    })
}

/// Removes generated entries for paths the publisher owns.
fn drop_reserved_paths(task: &str, files: &mut FileSet) {
    files.retain(|path, _| {
        let reserved = path == LICENSE_PATH || is_history_path(path);
        if reserved {
            warn!(task, path = %path, "Dropping generated file at reserved path");
        }
        !reserved
    });
}
