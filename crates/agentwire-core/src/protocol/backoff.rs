//! Reconnect backoff
//!
//! `delay(n) = min(max_delay, initial_delay * 2^(n-1) * (1 + jitter))` with a
//! fresh jitter in `[0, 0.3)` on every call so that channels which lost their
//! connection together do not retry in lockstep.

use core::time::Duration;
use rand::Rng;

use crate::config::RetryPolicy;

/// Upper bound (exclusive) of the random jitter fraction
pub const MAX_JITTER_FRACTION: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_retry(policy: &RetryPolicy) -> Self {
        Self::new(policy.initial_delay(), policy.max_delay(), policy.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` failed attempts means the channel should give up
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay for `attempt` without jitter, capped at the max delay
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 0.0)
    }

    /// Delay for `attempt` with an explicit jitter fraction
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.max(1) - 1;
        let growth = 2f64.powi(exponent.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * growth * (1.0 + jitter);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay for `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER_FRACTION);
        self.delay_with_jitter(attempt, jitter)
    }
}

impl From<&RetryPolicy> for BackoffPolicy {
    fn from(policy: &RetryPolicy) -> Self {
        Self::from_retry(policy)
    }
}
