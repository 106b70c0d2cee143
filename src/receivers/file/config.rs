// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file receiver.

use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::file::input::StartAt;
use crate::receivers::file::watcher::WatchMode;

/// What to do with a registry file that cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptRegistryPolicy {
    /// Move it aside and start empty, files are re-read from the beginning
    #[default]
    Reset,
    /// Refuse to start
    Fail,
}

/// Configuration for the file receiver
#[derive(Debug, Clone)]
pub struct FileReceiverConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,
    /// Glob patterns for files to exclude
    pub exclude: Vec<String>,
    /// Where to start reading files without registry state
    pub start_at: StartAt,
    /// How harvesters wait for new data: auto, native, or poll
    pub watch_mode: WatchMode,
    /// How often the prospector rescans the patterns
    pub scan_interval: Duration,
    /// How long scans may keep failing before the receiver gives up
    pub max_scan_failure_duration: Duration,
    /// Initial wait of an idle harvester before checking the file again
    pub poll_backoff: Duration,
    /// Upper bound for the idle wait, also bounds native waits
    pub max_poll_backoff: Duration,
    /// Path of the persisted registry
    pub registry_path: PathBuf,
    /// Registry corruption handling
    pub corrupt_registry: CorruptRegistryPolicy,
    /// Number of bytes to use for file fingerprinting
    pub fingerprint_size: usize,
    /// Size of a single read
    pub read_buffer_size: usize,
    /// Maximum line size in bytes, longer lines are cut
    pub max_line_size: usize,
    /// Delay before a file that no longer matches any pattern is closed. With
    /// `None` it is harvested until it is deleted.
    pub close_renamed: Option<Duration>,
    /// Delay before registry state of a vanished file is dropped
    pub clean_removed: Option<Duration>,
    /// Capacity of the channel between harvesters and the spooler
    pub queue_size: usize,
}

impl Default for FileReceiverConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            start_at: StartAt::Beginning,
            watch_mode: WatchMode::Auto,
            scan_interval: Duration::from_secs(1),
            max_scan_failure_duration: Duration::from_secs(60),
            poll_backoff: Duration::from_millis(250),
            max_poll_backoff: Duration::from_secs(2),
            registry_path: PathBuf::from("/var/lib/tailbeat/registry.json"),
            corrupt_registry: CorruptRegistryPolicy::Reset,
            fingerprint_size: 1024,
            read_buffer_size: 16 * 1024,
            max_line_size: 64 * 1024,
            close_renamed: None,
            clean_removed: Some(Duration::from_secs(300)),
            queue_size: 4096,
        }
    }
}

impl FileReceiverConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.include.is_empty() {
            return Err("At least one include pattern must be specified".to_string());
        }

        if self.fingerprint_size < 16 {
            return Err("fingerprint_size must be at least 16 bytes".to_string());
        }

        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be positive".to_string());
        }

        if self.max_line_size == 0 {
            return Err("max_line_size must be positive".to_string());
        }

        if self.queue_size == 0 {
            return Err("queue_size must be positive".to_string());
        }

        if self.scan_interval.is_zero() {
            return Err("scan_interval must be positive".to_string());
        }

        if self.poll_backoff.is_zero() || self.max_poll_backoff < self.poll_backoff {
            return Err(
                "poll_backoff must be positive and not larger than max_poll_backoff".to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = FileReceiverConfig::default();
        assert!(config.validate().is_err());

        config.include = vec!["/var/log/*.log".to_string()];
        assert!(config.validate().is_ok());

        config.fingerprint_size = 10;
        assert!(config.validate().is_err());
        config.fingerprint_size = 1024;

        config.max_poll_backoff = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }
}
