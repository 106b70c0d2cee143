// SPDX-License-Identifier: Apache-2.0

//! File receiver for tailing log files.
//!
//! The prospector scans glob patterns and starts one harvester per file.
//! Harvesters read appended lines and send them, in file order, to the
//! spooler, which publishes them and advances the persisted registry once
//! the sink acknowledged them.
//!
//! Files are tracked by device and inode, so renames and rotations keep their
//! read position across restarts.

pub mod config;
pub mod error;
pub mod harvester;
pub mod input;
pub mod persistence;
pub mod prospector;
pub mod receiver;
pub mod record;
pub mod registry;
pub mod watcher;

pub use config::{CorruptRegistryPolicy, FileReceiverConfig};
pub use error::{Error, Result};
pub use input::{FileFinder, FileId, Fingerprint, StartAt};
pub use receiver::FileReceiver;
pub use record::{FileEvent, Record};
pub use registry::{FileRegistry, RegistryEntry, RegistrySnapshot, UpdateOutcome};
pub use watcher::WatchMode;
