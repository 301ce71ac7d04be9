use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use shared::protocol::{normalize_availability, normalize_log_snippet, LiveStatusSnapshot};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Source of the raw status and log payloads for the live machine.
#[async_trait]
pub trait LiveStatusFeed: Send + Sync {
    async fn fetch_status(&self) -> Result<Value>;
    async fn fetch_log(&self) -> Result<Value>;
}

pub struct HttpLiveStatusFeed {
    http: Client,
    status_url: Url,
    log_url: Option<Url>,
}

impl HttpLiveStatusFeed {
    pub fn new(status_url: Url, log_url: Option<Url>) -> Self {
        Self {
            http: Client::new(),
            status_url,
            log_url,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Value> {
        let body = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("live feed request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("live feed {url} returned an error status"))?
            .text()
            .await
            .with_context(|| format!("failed to read live feed body from {url}"))?;
        // Some feeds answer with a bare word instead of JSON.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl LiveStatusFeed for HttpLiveStatusFeed {
    async fn fetch_status(&self) -> Result<Value> {
        self.fetch(&self.status_url).await
    }

    async fn fetch_log(&self) -> Result<Value> {
        match &self.log_url {
            Some(url) => self.fetch(url).await,
            None => Ok(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Updated(LiveStatusSnapshot),
    /// Another poll was already running; this call did nothing.
    Skipped,
    /// The feed failed; the last known snapshot is kept.
    Failed,
}

/// Polls the feed on demand. Overlapping calls are dropped, not queued.
pub struct LiveStatusPoller {
    feed: Arc<dyn LiveStatusFeed>,
    in_flight: AtomicBool,
    last: RwLock<Option<LiveStatusSnapshot>>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LiveStatusPoller {
    pub fn new(feed: Arc<dyn LiveStatusFeed>) -> Self {
        Self {
            feed,
            in_flight: AtomicBool::new(false),
            last: RwLock::new(None),
        }
    }

    pub async fn last_known(&self) -> Option<LiveStatusSnapshot> {
        self.last.read().await.clone()
    }

    pub async fn poll(&self, now: DateTime<Utc>) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("live status poll already in flight; skipping");
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let (status, log) = tokio::join!(self.feed.fetch_status(), self.feed.fetch_log());
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "live status fetch failed; keeping last known value");
                return PollOutcome::Failed;
            }
        };

        let previous = self.last.read().await.clone();
        let log_snippet = match log {
            Ok(log) => normalize_log_snippet(&log),
            Err(err) => {
                warn!(error = %err, "live log fetch failed; keeping last known snippet");
                previous.and_then(|p| p.log_snippet)
            }
        };

        let snapshot = LiveStatusSnapshot {
            availability: normalize_availability(&status),
            log_snippet,
            fetched_at: now,
        };
        info!(availability = ?snapshot.availability, "live status updated");
        *self.last.write().await = Some(snapshot.clone());
        PollOutcome::Updated(snapshot)
    }
}

#[cfg(test)]
#[path = "tests/live_status_tests.rs"]
mod tests;
