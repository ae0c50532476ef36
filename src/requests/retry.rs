//! Retry limits and backoff between server-error retries.
//!
//! Attempt semantics follow the usual convention: attempt `0` is the initial
//! call (no delay) and retries start at `1`. Delays grow exponentially from
//! `base`, saturate at `max`, and optionally apply full jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::DispatcherConfig;

/// Exponential backoff with an upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: false,
        }
    }

    /// Pick a uniformly random delay in `[0, computed]` instead of the computed delay.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound of the delay before retry number `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 1u128 << exponent;
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        let capped = nanos.min(self.max.as_nanos());
        Duration::from_nanos(capped.min(u64::MAX as u128) as u64)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let nanos = rand::thread_rng().gen_range(0..=ceiling.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

/// How many times the dispatcher retries before failing a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after 5xx responses or transport failures
    pub max_server_retries: u32,
    /// Rate-limit cooldowns tolerated before giving up
    pub max_throttle_retries: u32,
    pub backoff: Backoff,
    /// Upper bound on any server-requested cooldown
    pub max_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            max_server_retries: config.max_server_retries,
            max_throttle_retries: config.max_throttle_retries,
            backoff: Backoff::exponential(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            )
            .with_jitter(config.backoff_jitter),
            max_cooldown: config.max_cooldown(),
        }
    }

    /// Whether another server-error retry is allowed after `failures` failures.
    pub fn should_retry_server(&self, failures: u32) -> bool {
        failures <= self.max_server_retries
    }

    pub fn should_retry_throttle(&self, throttles: u32) -> bool {
        throttles <= self.max_throttle_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}
