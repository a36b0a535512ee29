//! Tiered retry backoff.

use crate::error::FailureCategory;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base_seconds: u64,
    pub max_seconds: u64,
    /// Timeouts get at least this much breathing room so a struggling
    /// upstream is not hammered on every poll.
    pub timeout_floor_seconds: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_seconds: 30,
            max_seconds: 600,
            timeout_floor_seconds: 180,
        }
    }
}

/// Delay before the given attempt becomes eligible again. `attempt` is the
/// attempt number that just failed, starting at 1.
pub fn backoff_seconds(policy: BackoffPolicy, attempt: i32, category: FailureCategory) -> u64 {
    let tier = if attempt <= 1 {
        policy.base_seconds
    } else if attempt == 2 {
        policy.base_seconds.saturating_mul(4)
    } else {
        policy.base_seconds.saturating_mul(20)
    };

    let mut seconds = tier.min(policy.max_seconds);
    if category == FailureCategory::Timeout {
        seconds = seconds.max(policy.timeout_floor_seconds);
    }
    seconds
}
