//! Transport-level retry policy.
//!
//! The delay for attempt `n` is `min_backoff × 2^n`, clamped to
//! `max_backoff`. Only transient broker errors are retried; this is
//! independent of the publisher's message-level attempts.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::BrokerError;

/// Exponential backoff for reconnecting/resending inside a broker client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryExponential {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
}

impl RetryExponential {
    pub fn new(min_backoff: Duration, max_backoff: Duration, max_retries: u32) -> Self {
        Self {
            min_backoff,
            max_backoff,
            max_retries,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.min_backoff
            .checked_mul(factor)
            .map(|d| d.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }

    /// Run `op`, retrying transient errors until the retry budget or the
    /// deadline runs out. The last error is returned.
    pub fn run<T, F>(&self, deadline: Instant, mut op: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Result<T, BrokerError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    if Instant::now() + delay > deadline {
                        return Err(err);
                    }
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
