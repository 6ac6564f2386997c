//! Remote feed boundary.
//!
//! [`FeedSource`] is the only way the loader reaches the publisher, so tests and
//! mirrors can substitute their own implementation.

use std::time::Duration;

use osmc_schemas::SequenceNumber;
use tracing::{debug, warn};

use crate::locator;
use crate::{FeedError, FeedState};

/// Upstream replication feed contract.
///
/// Implementations must be object-safe (`Arc<dyn FeedSource>`) and `Send + Sync`.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable name (e.g. `"http"`).
    fn name(&self) -> &'static str;

    /// Raw (still compressed) payload of one segment, exactly as published.
    async fn fetch_segment(&self, seq: SequenceNumber) -> Result<Vec<u8>, FeedError>;

    /// Latest published sequence descriptor.
    async fn fetch_state(&self) -> Result<FeedState, FeedError>;
}

/// Bounded retry-with-backoff around remote fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retry.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// reqwest-backed feed source.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpFeedSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, FeedError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("osmc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Fetch {
                url: base_url.clone(),
                message: format!("http client build failed: {e}"),
            })?;
        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let fetch_err = |e: reqwest::Error| FeedError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        let resp = self.http.get(url).send().await.map_err(fetch_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await.map_err(fetch_err)?;
        Ok(body.to_vec())
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(body) => {
                    debug!(url, attempt, bytes = body.len(), "feed fetch ok");
                    return Ok(body);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        event = "fetch_retry",
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "feed fetch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_segment(&self, seq: SequenceNumber) -> Result<Vec<u8>, FeedError> {
        let url = locator::remote_url(&self.base_url, seq);
        self.get_with_retry(&url).await
    }

    async fn fetch_state(&self) -> Result<FeedState, FeedError> {
        let url = locator::state_url(&self.base_url);
        let body = self.get_with_retry(&url).await?;
        let text = String::from_utf8(body)
            .map_err(|e| FeedError::Decode(format!("state descriptor is not utf-8: {e}")))?;
        FeedState::parse(&text)
    }
}
