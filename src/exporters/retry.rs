// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff with jitter. There is no retry limit, callers give up
/// on their own terms (shutdown).
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    current_backoff: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, within +/- 25% of the current backoff.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;

        let backoff_ms = self.current_backoff.as_millis() as i64;

        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        let jitter = (rand::random::<u64>() % v as u64) as i64 - (v / 2);
        let mut sleep_ms = backoff_ms + jitter;
        if sleep_ms < 1 {
            sleep_ms = 1;
        }

        // Increase backoff for next retry, but cap at max_backoff
        self.current_backoff = std::cmp::min(self.current_backoff * 2, self.config.max_backoff);

        Duration::from_millis(sleep_ms as u64)
    }
}
