//! Turns a raw response into the dispatcher's next move.

use std::time::Duration;

use serde::Deserialize;

use super::response::Response;
use crate::error::RestError;
use crate::ratelimit::headers::{seconds_to_duration, RateLimitHeaders};

/// Cooldown applied to a 429 that states no delay at all.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Category of a completed response.
#[derive(Debug)]
pub enum Classification {
    Success,
    /// Explicit rate-limit rejection
    Throttled { retry_after: Duration, global: bool },
    /// 5xx: retry with backoff
    ServerError { status: u16, message: String },
    /// Permanent client error; never retried
    ClientError(RestError),
}

#[derive(Debug, Default, Deserialize)]
struct ThrottleBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// Longest cooldown honoured when no other bound is configured.
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(600);

pub fn classify(response: &Response) -> Classification {
    classify_within(response, DEFAULT_MAX_COOLDOWN)
}

/// Like [`classify`], with every server-stated delay bounded by `max_cooldown`.
pub fn classify_within(response: &Response, max_cooldown: Duration) -> Classification {
    match response.status {
        200..=299 => Classification::Success,
        429 => {
            let accounting = RateLimitHeaders::parse(&response.headers);
            let body: ThrottleBody = serde_json::from_slice(&response.body).unwrap_or_default();
            let retry_after = RateLimitHeaders::retry_after(&response.headers)
                .or_else(|| body.retry_after.and_then(seconds_to_duration))
                .unwrap_or(DEFAULT_RETRY_AFTER)
                .min(max_cooldown);

            Classification::Throttled {
                retry_after,
                global: accounting.global || body.global,
            }
        }
        500..=599 => Classification::ServerError {
            status: response.status,
            message: response.api_error().message,
        },
        401 | 403 => {
            let error = response.api_error();
            let message = if error.message.is_empty() {
                "Forbidden".to_string()
            } else {
                error.to_string()
            };
            Classification::ClientError(RestError::Permission {
                permission: None,
                message,
            })
        }
        404 => Classification::ClientError(RestError::NotFound(response.api_error())),
        status => Classification::ClientError(RestError::Validation {
            status,
            error: response.api_error(),
        }),
    }
}
