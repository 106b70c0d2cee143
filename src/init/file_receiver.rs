// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;

use crate::receivers::file::config::{CorruptRegistryPolicy, FileReceiverConfig};
use crate::receivers::file::input::StartAt;
use crate::receivers::file::watcher::WatchMode;

/// Where to start reading files
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    #[default]
    Beginning,
    /// Start at the end of the file (tail mode)
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

/// Watch mode for file system monitoring
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum WatchModeArg {
    /// Automatically select the best watching strategy (native first, poll fallback)
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents)
    Native,
    /// Force polling mode (use for NFS or when native watching is unreliable)
    Poll,
}

impl From<WatchModeArg> for WatchMode {
    fn from(w: WatchModeArg) -> Self {
        match w {
            WatchModeArg::Auto => WatchMode::Auto,
            WatchModeArg::Native => WatchMode::Native,
            WatchModeArg::Poll => WatchMode::Poll,
        }
    }
}

/// Handling of a registry file that cannot be parsed
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum CorruptRegistryArg {
    /// Move the file aside and start with an empty registry
    #[default]
    Reset,
    /// Refuse to start
    Fail,
}

impl From<CorruptRegistryArg> for CorruptRegistryPolicy {
    fn from(c: CorruptRegistryArg) -> Self {
        match c {
            CorruptRegistryArg::Reset => CorruptRegistryPolicy::Reset,
            CorruptRegistryArg::Fail => CorruptRegistryPolicy::Fail,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct FileReceiverArgs {
    /// Comma-separated glob patterns for files to include (e.g., "/var/log/*.log,/tmp/*.log")
    #[arg(long, env = "TAILBEAT_INCLUDE", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "TAILBEAT_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Where to start reading files without registry state: beginning or end
    #[arg(value_enum, long, env = "TAILBEAT_START_AT", default_value = "beginning")]
    pub start_at: StartAtArg,

    /// Watch mode: auto (default), native (inotify/kqueue/FSEvents), poll (for NFS)
    #[arg(value_enum, long, env = "TAILBEAT_WATCH_MODE", default_value = "auto")]
    pub watch_mode: WatchModeArg,

    /// How often the include patterns are rescanned
    #[arg(long, env = "TAILBEAT_SCAN_FREQUENCY", default_value = "1s")]
    pub scan_frequency: humantime::Duration,

    /// Maximum duration of consecutive scan failures before exiting
    #[arg(long, env = "TAILBEAT_MAX_SCAN_FAILURE_DURATION", default_value = "60s")]
    pub max_scan_failure_duration: humantime::Duration,

    /// Initial wait of an idle harvester before looking at its file again
    #[arg(long, env = "TAILBEAT_POLL_BACKOFF", default_value = "250ms")]
    pub poll_backoff: humantime::Duration,

    /// Maximum wait of an idle harvester
    #[arg(long, env = "TAILBEAT_MAX_POLL_BACKOFF", default_value = "2s")]
    pub max_poll_backoff: humantime::Duration,

    /// Path of the file registry
    #[arg(
        long,
        env = "TAILBEAT_REGISTRY_PATH",
        default_value = "/var/lib/tailbeat/registry.json"
    )]
    pub registry_path: PathBuf,

    /// What to do with a registry that cannot be parsed: reset or fail
    #[arg(
        value_enum,
        long,
        env = "TAILBEAT_CORRUPT_REGISTRY",
        default_value = "reset"
    )]
    pub corrupt_registry: CorruptRegistryArg,

    /// Number of leading bytes used to fingerprint a file
    #[arg(long, env = "TAILBEAT_FINGERPRINT_SIZE", default_value = "1024")]
    pub fingerprint_size: usize,

    /// Size of a single read in bytes
    #[arg(long, env = "TAILBEAT_READ_BUFFER_SIZE", default_value = "16384")]
    pub read_buffer_size: usize,

    /// Maximum line size in bytes (longer lines are cut and flagged)
    #[arg(long, env = "TAILBEAT_MAX_LINE_SIZE", default_value = "65536")]
    pub max_line_size: usize,

    /// Close files that no longer match the include patterns after this delay,
    /// they are otherwise harvested until deleted
    #[arg(long, env = "TAILBEAT_CLOSE_RENAMED")]
    pub close_renamed: Option<humantime::Duration>,

    /// Delay before registry state of a vanished file is dropped, 0s keeps it forever
    #[arg(long, env = "TAILBEAT_CLEAN_REMOVED", default_value = "5m")]
    pub clean_removed: humantime::Duration,

    /// Capacity of the queue between harvesters and the publisher
    #[arg(long, env = "TAILBEAT_QUEUE_SIZE", default_value = "4096")]
    pub queue_size: usize,
}

impl FileReceiverArgs {
    /// Build the receiver config from command line args
    pub fn build_config(&self) -> FileReceiverConfig {
        let clean_removed: std::time::Duration = self.clean_removed.into();
        FileReceiverConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            start_at: self.start_at.into(),
            watch_mode: self.watch_mode.into(),
            scan_interval: self.scan_frequency.into(),
            max_scan_failure_duration: self.max_scan_failure_duration.into(),
            poll_backoff: self.poll_backoff.into(),
            max_poll_backoff: self.max_poll_backoff.into(),
            registry_path: self.registry_path.clone(),
            corrupt_registry: self.corrupt_registry.into(),
            fingerprint_size: self.fingerprint_size,
            read_buffer_size: self.read_buffer_size,
            max_line_size: self.max_line_size,
            close_renamed: self.close_renamed.map(Into::into),
            clean_removed: (!clean_removed.is_zero()).then_some(clean_removed),
            queue_size: self.queue_size,
        }
    }
}
