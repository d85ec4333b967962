//! Retry decisions with exponential backoff.

use chrono::{DateTime, Duration, Utc};

use crate::types::RetryConfig;

/// Upper bound on a single backoff delay; keeps huge multipliers from
/// overflowing chrono's range.
const MAX_BACKOFF_MS: f64 = 30.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Outcome of consulting the retry policy after a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// The schedule has no retry policy; the failure is final.
    NotConfigured,
    /// Schedule a new attempt.
    Retry {
        /// Attempt number of the new execution.
        attempt: u32,
        delay: Duration,
        due: DateTime<Utc>,
    },
    /// `max_retries` retries already happened for this failure chain.
    Exhausted { max_retries: u32 },
}

/// Delay before retry number `failed_attempt + 1`:
/// `retry_delay_minutes × backoff_multiplier ^ failed_attempt`.
pub fn backoff_delay(config: &RetryConfig, failed_attempt: u32) -> Duration {
    let base_ms = config.retry_delay_minutes as f64 * 60_000.0;
    let factor = config.backoff_multiplier.max(1.0).powi(failed_attempt as i32);
    let ms = (base_ms * factor).min(MAX_BACKOFF_MS);
    Duration::milliseconds(ms as i64)
}

/// Decide what happens after an execution with `failed_attempt` failed at `now`.
pub fn decide(config: Option<&RetryConfig>, failed_attempt: u32, now: DateTime<Utc>) -> RetryDecision {
    let Some(config) = config else {
        return RetryDecision::NotConfigured;
    };
    if failed_attempt >= config.max_retries {
        return RetryDecision::Exhausted {
            max_retries: config.max_retries,
        };
    }
    let delay = backoff_delay(config, failed_attempt);
    RetryDecision::Retry {
        attempt: failed_attempt + 1,
        delay,
        due: now + delay,
    }
}
