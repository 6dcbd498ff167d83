//! Retry bookkeeping and backoff.
//!
//! The delay for retry `n` (0-based count of attempts already failed) is
//! `base × 2^n`, clamped to `max`. The base delay is derived purely from the
//! attempt number, never from the previous delay.

use std::time::Duration;

use crate::config::RetryConfig;

/// Capped exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(300),
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_secs(config.backoff_base_seconds),
            max: Duration::from_secs(config.backoff_max_seconds),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Attempt counter bounded by a maximum.
///
/// The counter only moves forward; [`RetryState::begin`] refuses to hand out
/// an attempt once the maximum is reached.
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl RetryState {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Claim the next attempt, returning its 1-based number.
    pub fn begin(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Attempts launched so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay(self.attempts.saturating_sub(1))
    }
}
