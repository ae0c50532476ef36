//! Rate-limit accounting: per-bucket quota state and the global ceiling.

mod bucket;
mod global;
pub mod headers;

use std::time::Duration;

use tokio::time::Instant;

pub use bucket::RateLimitBucket;
pub use global::GlobalCeiling;
pub use headers::RateLimitHeaders;

/// `now + delay`, saturating far in the future instead of overflowing.
pub(crate) fn deadline(now: Instant, delay: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
