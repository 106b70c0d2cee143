// SPDX-License-Identifier: Apache-2.0

//! Native file notifications using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW

use std::path::Path;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use super::traits::{DataWaiter, WaitOutcome, WaiterError};
use crate::bounded_channel::{BoundedReceiver, bounded};

/// Waits for notifications about a single file.
///
/// Notifications are coalesced into a channel of capacity one: any number of
/// writes between two waits wake the harvester once.
pub struct NativeWaiter {
    // Dropping the watcher stops notifications
    _watcher: RecommendedWatcher,
    rx: BoundedReceiver<()>,
}

impl NativeWaiter {
    pub fn new(path: &Path) -> Result<Self, WaiterError> {
        let (tx, rx) = bounded(1);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    // Our own reads show up as access events
                    if !matches!(event.kind, EventKind::Access(_)) {
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => {
                    warn!("File watcher error: {}", e);
                    let _ = tx.try_send(());
                }
            },
            Config::default(),
        )
        .map_err(|e| WaiterError::Init(e.to_string()))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WaiterError::Watch(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }
}

impl DataWaiter for NativeWaiter {
    async fn wait_for_more_data(&mut self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.rx.next()).await {
            Ok(Some(())) => WaitOutcome::Notified,
            Ok(None) => {
                // Watcher callback is gone, degrade to plain sleeping
                tokio::time::sleep(timeout).await;
                WaitOutcome::TimedOut
            }
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    fn data_seen(&mut self) {}

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "native"
    }
}
