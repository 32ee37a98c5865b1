//! Per-host request pacing for catalog scraping.
//!
//! Catalogs that need several page loads per author (Gutenberg fetches one
//! page per book) are polite about it: requests to the same host are spaced
//! by a minimum delay, while different hosts proceed independently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Minimum-spacing limiter keyed by URL host.
///
/// Shared by reference between the futures of one search stream; safe to
/// wrap in `Arc` and use from several tasks.
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    disabled: bool,
    /// `Arc` values let the map shard lock be released before awaiting.
    hosts: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl RateLimiter {
    /// Creates a limiter enforcing `spacing` between requests to one host.
    #[must_use]
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            disabled: spacing.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Waits until a request to `url`'s host is allowed, then claims the slot.
    ///
    /// The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last_request = state.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.spacing {
                let delay = self.spacing.saturating_sub(elapsed);
                debug!(host = %host, delay_ms = delay.as_millis(), "pacing catalog request");
                tokio::time::sleep(delay).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

/// Lower-cased host of `url`, or `"unknown"` when it cannot be parsed.
#[must_use]
pub(crate) fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}
