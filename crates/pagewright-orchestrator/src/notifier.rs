//! Delivery of evaluation records to the caller's callback URL.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{PagewrightError, Result};
use crate::retry::RetryPolicy;
use crate::task::EvaluationRecord;

/// Timeout for a single callback request.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

const SERVICE: &str = "evaluation endpoint";

/// Delivers evaluation records.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `record` to `url`, retrying until accepted or out of budget.
    async fn send(&self, url: &str, record: &EvaluationRecord) -> Result<()>;
}

/// [`Notifier`] that POSTs JSON over HTTP.
///
/// Any status below 400 counts as delivered. Error statuses and transport
/// failures are retried; the whole delivery is bounded by `overall_timeout`.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    retry: RetryPolicy,
    overall_timeout: Duration,
}

impl HttpNotifier {
    /// Creates a notifier.
    pub fn new(retry: RetryPolicy, overall_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| PagewrightError::transport(SERVICE, format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            retry,
            overall_timeout,
        })
    }

    async fn post_once(&self, url: &str, record: &EvaluationRecord) -> Result<()> {
        let response = self
            .http
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| PagewrightError::transport(SERVICE, e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PagewrightError::CallbackRejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        info!(url, status = status.as_u16(), "Evaluation endpoint accepted record");
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, record), fields(task = %record.task, round = record.round))]
    async fn send(&self, url: &str, record: &EvaluationRecord) -> Result<()> {
        tokio::time::timeout(
            self.overall_timeout,
            self.retry.run("notify_evaluation", || self.post_once(url, record)),
        )
        .await
        .map_err(|_| PagewrightError::NotificationTimeout {
            url: url.to_string(),
            timeout_secs: self.overall_timeout.as_secs(),
        })?
    }
}
