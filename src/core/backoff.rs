//! Restart backoff computation
//!
//! Pure mapping from (strategy, attempts so far) to a delay. The
//! exponential curve is clamped at 60s so an unlucky service never
//! schedules an hour-long wait.

use std::time::Duration;

use crate::model::BackoffStrategy;

const FIXED_DELAY_SECS: u64 = 5;
const MAX_EXPONENTIAL_SECS: u64 = 60;

/// Delay before restart attempt `restart_count` (0-based: the count of
/// attempts already initiated when the decision is made).
pub fn restart_delay(strategy: BackoffStrategy, restart_count: u32) -> Duration {
    match strategy {
        BackoffStrategy::Immediate => Duration::ZERO,
        BackoffStrategy::Fixed => Duration::from_secs(FIXED_DELAY_SECS),
        BackoffStrategy::Exponential => {
            let secs = 2u64
                .checked_pow(restart_count)
                .unwrap_or(u64::MAX)
                .min(MAX_EXPONENTIAL_SECS);
            Duration::from_secs(secs)
        }
    }
}
