// SPDX-License-Identifier: Apache-2.0

//! Traits and types for waiting on file growth.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Error type for waiter setup
#[derive(Debug)]
pub enum WaiterError {
    /// Failed to initialize the notification backend
    Init(String),
    /// Failed to watch a path
    Watch(String),
}

impl fmt::Display for WaiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiterError::Init(msg) => write!(f, "watcher initialization failed: {}", msg),
            WaiterError::Watch(msg) => write!(f, "watch failed: {}", msg),
        }
    }
}

impl std::error::Error for WaiterError {}

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The OS reported activity on the file
    Notified,
    /// Nothing was reported, the caller should check the file anyway
    TimedOut,
}

/// Strategy used by an idle harvester to suspend until its file may have grown.
///
/// Implementations may return early or late relative to actual writes, so the
/// harvester always re-checks the file after a wait.
pub trait DataWaiter: Send {
    /// Suspend until more data may be available, for at most `timeout`.
    fn wait_for_more_data(&mut self, timeout: Duration)
    -> impl Future<Output = WaitOutcome> + Send;

    /// Called after a read returned data.
    fn data_seen(&mut self);

    /// True for OS notification backends.
    fn is_native(&self) -> bool;

    /// Name of the backend for logging.
    fn backend_name(&self) -> &'static str;
}
