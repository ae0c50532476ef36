//! Bucket accounting carried in response headers.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::requests::Headers;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const RETRY_AFTER: &str = "retry-after";
pub const DATE: &str = "date";

/// Accounting extracted from one response.
///
/// Every field is optional: a response that omits a header leaves the
/// corresponding bucket field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Calls allowed per window
    pub limit: Option<u32>,
    /// Calls left in the current window
    pub remaining: Option<u32>,
    /// Time until the window resets, relative to when the response arrived
    pub reset_after: Option<Duration>,
    /// Server-side bucket identifier, informational only
    pub bucket: Option<String>,
    /// Whether a rejection applies to the whole session
    pub global: bool,
}

impl RateLimitHeaders {
    pub fn parse(headers: &Headers) -> Self {
        let reset_after = headers
            .parse::<f64>(RESET_AFTER)
            .and_then(seconds_to_duration)
            .or_else(|| {
                headers
                    .parse::<f64>(RESET)
                    .and_then(|epoch| reset_from_epoch(epoch, server_now(headers)))
            });

        Self {
            limit: headers.parse(LIMIT),
            remaining: headers.parse(REMAINING),
            reset_after,
            bucket: headers.get(BUCKET).map(str::to_string),
            global: headers
                .get(GLOBAL)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// `Retry-After` in seconds, when present.
    pub fn retry_after(headers: &Headers) -> Option<Duration> {
        headers
            .parse::<f64>(RETRY_AFTER)
            .and_then(seconds_to_duration)
    }

    /// Bound the reset delay by `max`, however far out the server put it.
    pub fn capped(mut self, max: Duration) -> Self {
        self.reset_after = self.reset_after.map(|after| after.min(max));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_after.is_none()
    }
}

/// The server's notion of "now", taken from the `Date` header when it parses.
fn server_now(headers: &Headers) -> DateTime<Utc> {
    headers
        .get(DATE)
        .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
        .map(|date| date.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn reset_from_epoch(epoch_secs: f64, now: DateTime<Utc>) -> Option<Duration> {
    let now_secs = now.timestamp_millis() as f64 / 1000.0;
    seconds_to_duration((epoch_secs - now_secs).max(0.0))
}

pub(crate) fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
