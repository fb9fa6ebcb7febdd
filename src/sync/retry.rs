//! Retry budget and capped exponential backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One retry policy shared by every action type.
///
/// `max_retries` is the default budget; an action enqueued with its own budget keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, `min(base * 2^retries, cap)`
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.backoff_cap)
    }

    /// Whether an action that has failed `retry_count` times may be attempted again
    pub fn allows_retry(retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }
}
