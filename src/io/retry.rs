use crate::types::{RevisitError, RevisitResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with fixed or exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for exponential growth
    pub max_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential: false,
        }
    }

    /// Delay slept after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> RevisitResult<T>
    where
        F: FnMut(u32) -> RevisitResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            log::debug!("{}: attempt {} of {}", label, attempt, max_attempts);
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    log::warn!("{}: giving up after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) if !is_retryable(&e) => {
                    log::warn!("{}: not retrying: {}", label, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{}: attempt {} failed, retrying in {:?}: {}",
                        label,
                        attempt,
                        delay,
                        e
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Transport failures, server errors and rate limiting are worth another
/// attempt; other client errors and malformed responses are not
fn is_retryable(error: &RevisitError) -> bool {
    match error {
        RevisitError::Network(_) | RevisitError::Io(_) => true,
        RevisitError::Http { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}
