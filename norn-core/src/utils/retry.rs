//! Exponential backoff for venue submission retries
//!
//! Venue submissions retry transient failures up to a bounded attempt count
//! and a bounded total elapsed time, whichever is hit first.

use crate::core::VenueError;
use std::time::Duration;
use tracing::warn;

/// Configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per retry
    pub multiplier: f64,
    /// Total attempts (initial try included)
    pub max_attempts: usize,
    /// Cap on the sum of all delays
    pub max_elapsed: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // Venue policy: 3 attempts, 10 seconds aggregate
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 3,
            max_elapsed: Duration::from_secs(10),
        }
    }
}

/// Exponential backoff state machine
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: usize,
    current_delay: Duration,
    elapsed: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            attempt: 0,
            elapsed: Duration::ZERO,
            config,
        }
    }

    /// The delay to sleep before the next retry, or `None` when the attempt
    /// or elapsed-time budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.config.max_attempts {
            return None;
        }
        let delay = self.current_delay.min(self.config.max_delay);
        if self.elapsed + delay > self.config.max_elapsed {
            return None;
        }
        self.attempt += 1;
        self.elapsed += delay;
        self.current_delay =
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier);
        Some(delay)
    }

    pub fn attempt_number(&self) -> usize {
        self.attempt
    }
}

/// Run `op` until it succeeds, fails non-retryably, or the backoff budget
/// runs out. `sleep` is injected so the backtester can pass a no-op.
pub fn with_retry<T>(
    config: &BackoffConfig,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut() -> Result<T, VenueError>,
) -> Result<T, VenueError> {
    let mut backoff = ExponentialBackoff::new(config.clone());
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt = backoff.attempt_number(),
                        ?delay,
                        "venue submission failed, retrying: {}",
                        err
                    );
                    sleep(delay);
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}
