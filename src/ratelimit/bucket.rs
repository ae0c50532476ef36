//! Per-bucket rate limit state.

use std::time::Duration;

use tokio::time::Instant;

use super::deadline;
use super::headers::RateLimitHeaders;
use crate::requests::Headers;

/// Server-reported quota state for one bucket key.
///
/// The bucket performs no locking itself. The dispatcher keeps each bucket
/// behind its lane's mutex, so exactly one writer touches it at a time.
///
/// A bucket that has never seen a response is optimistically available; the
/// first response supplies real accounting.
#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    key: String,
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    retry_at: Option<Instant>,
}

impl RateLimitBucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            limit: None,
            remaining: None,
            reset_at: None,
            retry_at: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a request may be sent right now.
    pub fn try_acquire(&self, now: Instant) -> bool {
        self.available_at(now) <= now
    }

    /// Earliest instant at which the next request may be sent.
    pub fn available_at(&self, now: Instant) -> Instant {
        let mut at = now;
        if self.remaining == Some(0) {
            if let Some(reset_at) = self.reset_at {
                at = at.max(reset_at);
            }
        }
        if let Some(retry_at) = self.retry_at {
            at = at.max(retry_at);
        }
        at
    }

    pub fn time_until_available(&self, now: Instant) -> Duration {
        self.available_at(now).saturating_duration_since(now)
    }

    /// Apply the accounting headers of the most recently completed request.
    pub fn update(&mut self, headers: &Headers, now: Instant) {
        self.apply(&RateLimitHeaders::parse(headers), now);
    }

    pub fn apply(&mut self, accounting: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = accounting.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = accounting.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = accounting.reset_after {
            self.reset_at = Some(deadline(now, reset_after));
        }
    }

    /// Start an explicit cooldown after the server rejected a request.
    pub fn mark_throttled(&mut self, retry_after: Duration, now: Instant) {
        self.retry_at = Some(deadline(now, retry_after));
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// No cooldown or exhausted window is pending at `now`.
    pub fn is_settled(&self, now: Instant) -> bool {
        let window_done = self.reset_at.map(|r| r <= now).unwrap_or(true);
        let cooldown_done = self.retry_at.map(|r| r <= now).unwrap_or(true);
        window_done && cooldown_done
    }
}
