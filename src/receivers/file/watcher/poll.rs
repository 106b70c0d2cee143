// SPDX-License-Identifier: Apache-2.0

//! Poll based waiting with exponential backoff.
//!
//! Works on every file system, including network mounts where notifications
//! are not delivered.

use std::time::Duration;

use super::traits::{DataWaiter, WaitOutcome};

pub struct PollWaiter {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl PollWaiter {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay the next wait will sleep for, before applying the caller timeout
    pub fn current_backoff(&self) -> Duration {
        self.current
    }
}

impl DataWaiter for PollWaiter {
    async fn wait_for_more_data(&mut self, timeout: Duration) -> WaitOutcome {
        tokio::time::sleep(self.current.min(timeout)).await;
        self.current = std::cmp::min(self.current * 2, self.max);
        WaitOutcome::TimedOut
    }

    fn data_seen(&mut self) {
        self.current = self.initial;
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_resets() {
        let mut waiter = PollWaiter::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(waiter.current_backoff(), Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        assert_eq!(
            waiter.wait_for_more_data(Duration::from_secs(10)).await,
            WaitOutcome::TimedOut
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150));

        waiter.wait_for_more_data(Duration::from_secs(10)).await;
        assert_eq!(waiter.current_backoff(), Duration::from_millis(350));

        waiter.wait_for_more_data(Duration::from_secs(10)).await;
        assert_eq!(waiter.current_backoff(), Duration::from_millis(350));

        waiter.data_seen();
        assert_eq!(waiter.current_backoff(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded_by_timeout() {
        let mut waiter = PollWaiter::new(Duration::from_secs(5), Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        waiter.wait_for_more_data(Duration::from_millis(20)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
