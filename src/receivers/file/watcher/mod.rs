// SPDX-License-Identifier: Apache-2.0

//! How an idle harvester waits for its file to grow.
//!
//! Two strategies are available:
//! - **Native**: OS-level notifications (inotify on Linux, FSEvents on macOS,
//!   ReadDirectoryChangesW on Windows) wake the harvester right after a write.
//! - **Poll**: the harvester sleeps with exponential backoff and re-checks the
//!   file. Use this on network file systems (NFS) where notifications are lost.
//!
//! `auto` mode tries native notifications first and falls back to polling.

mod native;
mod poll;
mod traits;

pub use native::NativeWaiter;
pub use poll::PollWaiter;
pub use traits::{DataWaiter, WaitOutcome, WaiterError};

use std::path::Path;
use std::time::Duration;

use tracing::debug;

/// Watch mode configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Native notifications when available, polling otherwise
    #[default]
    Auto,
    /// Force native notifications, harvesting a file fails if they are unavailable
    Native,
    /// Force polling
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaiterConfig {
    pub mode: WatchMode,
    /// First poll delay after the file stopped growing
    pub poll_backoff: Duration,
    /// Poll delay cap
    pub max_poll_backoff: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_backoff: Duration::from_millis(250),
            max_poll_backoff: Duration::from_secs(2),
        }
    }
}

/// Either waiting strategy, selected at runtime.
pub enum AnyWaiter {
    Native(NativeWaiter),
    Poll(PollWaiter),
}

impl DataWaiter for AnyWaiter {
    async fn wait_for_more_data(&mut self, timeout: Duration) -> WaitOutcome {
        match self {
            AnyWaiter::Native(w) => w.wait_for_more_data(timeout).await,
            AnyWaiter::Poll(w) => w.wait_for_more_data(timeout).await,
        }
    }

    fn data_seen(&mut self) {
        match self {
            AnyWaiter::Native(w) => w.data_seen(),
            AnyWaiter::Poll(w) => w.data_seen(),
        }
    }

    fn is_native(&self) -> bool {
        match self {
            AnyWaiter::Native(w) => w.is_native(),
            AnyWaiter::Poll(w) => w.is_native(),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            AnyWaiter::Native(w) => w.backend_name(),
            AnyWaiter::Poll(w) => w.backend_name(),
        }
    }
}

/// Create a waiter for `path` based on the configuration.
///
/// In `Auto` mode, this tries native notifications first and falls back to
/// polling if they fail to initialize.
pub fn create_waiter(config: &WaiterConfig, path: &Path) -> Result<AnyWaiter, WaiterError> {
    let poll = || PollWaiter::new(config.poll_backoff, config.max_poll_backoff);

    match config.mode {
        WatchMode::Native => Ok(AnyWaiter::Native(NativeWaiter::new(path)?)),
        WatchMode::Poll => Ok(AnyWaiter::Poll(poll())),
        WatchMode::Auto => match NativeWaiter::new(path) {
            Ok(waiter) => Ok(AnyWaiter::Native(waiter)),
            Err(e) => {
                debug!(
                    path = ?path,
                    error = %e,
                    "Native file notifications unavailable, falling back to polling."
                );
                Ok(AnyWaiter::Poll(poll()))
            }
        },
    }
}
