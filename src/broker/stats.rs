//! Rate-limit counters and the queue-depth snapshot.
//!
//! The API reports its quota on every response:
//!
//! | header | meaning |
//! |---|---|
//! | `x-rl-daily-limit` / `x-rl-hourly-limit` | quota size |
//! | `x-rl-daily-remaining` / `x-rl-hourly-remaining` | calls left |
//! | `x-rl-daily-reset` / `x-rl-hourly-reset` | when the window resets (server format, kept verbatim) |
//!
//! Quota is reported here, never enforced: admission only looks at the
//! concurrency bound.

use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cap applied to `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

const DAILY_LIMIT: &str = "x-rl-daily-limit";
const DAILY_REMAINING: &str = "x-rl-daily-remaining";
const DAILY_RESET: &str = "x-rl-daily-reset";
const HOURLY_LIMIT: &str = "x-rl-hourly-limit";
const HOURLY_REMAINING: &str = "x-rl-hourly-remaining";
const HOURLY_RESET: &str = "x-rl-hourly-reset";

/// Most recently observed quota counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    pub daily_limit: Option<u32>,
    pub daily_remaining: Option<u32>,
    pub daily_reset: Option<String>,
    pub hourly_limit: Option<u32>,
    pub hourly_remaining: Option<u32>,
    pub hourly_reset: Option<String>,
    /// Parsed `Retry-After`, capped at [`MAX_RETRY_AFTER`].
    pub retry_after: Option<Duration>,
}

impl RateLimits {
    /// Reads the counters from response headers.
    ///
    /// Returns `None` when the response carries none of the rate-limit headers,
    /// so a header-less response does not wipe the last known values.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str| text(name).and_then(|v| v.parse::<u32>().ok());

        let limits = Self {
            daily_limit: number(DAILY_LIMIT),
            daily_remaining: number(DAILY_REMAINING),
            daily_reset: text(DAILY_RESET).map(str::to_string),
            hourly_limit: number(HOURLY_LIMIT),
            hourly_remaining: number(HOURLY_REMAINING),
            hourly_reset: text(HOURLY_RESET).map(str::to_string),
            retry_after: text(RETRY_AFTER.as_str()).and_then(parse_retry_after),
        };

        (limits != Self::default()).then_some(limits)
    }

    /// True when neither the daily nor the hourly window has calls left.
    ///
    /// A missing counter counts as zero.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.daily_remaining.unwrap_or(0) == 0 && self.hourly_remaining.unwrap_or(0) == 0
    }
}

/// Parses a `Retry-After` value (delay-seconds or HTTP-date).
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let delay = if let Ok(seconds) = value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        Duration::from_secs(seconds)
    } else {
        let at = httpdate::parse_http_date(value).ok()?;
        at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
    };

    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}

/// Read-only snapshot exposed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiStats {
    /// Requests waiting in the pending queue.
    pub requests_queued: usize,
    /// Requests in flight.
    pub active: usize,
    /// Last known quota, if any response reported one.
    pub limits: Option<RateLimits>,
}

/// Owner side of the snapshot. Lives on the dispatcher task.
#[derive(Debug)]
pub(crate) struct StatsTracker {
    tx: watch::Sender<ApiStats>,
}

impl StatsTracker {
    pub(crate) fn new() -> (Self, watch::Receiver<ApiStats>) {
        let (tx, rx) = watch::channel(ApiStats::default());
        (Self { tx }, rx)
    }

    /// Publishes queue depth; observers are only woken on change.
    pub(crate) fn set_depth(&self, queued: usize, active: usize) {
        self.tx.send_if_modified(|stats| {
            let changed = stats.requests_queued != queued || stats.active != active;
            stats.requests_queued = queued;
            stats.active = active;
            changed
        });
    }

    pub(crate) fn record_limits(&self, limits: RateLimits) {
        self.tx.send_if_modified(|stats| {
            let changed = stats.limits.as_ref() != Some(&limits);
            stats.limits = Some(limits);
            changed
        });
    }
}
