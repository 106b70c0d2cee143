// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::receivers::file::input::{FileId, Fingerprint};

/// One line read from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub file_id: FileId,
    /// Path the file had when the line was read
    pub source: Arc<Path>,
    pub line: String,
    pub read_at: DateTime<Utc>,
    /// Byte position right after the line terminator
    pub offset: u64,
    /// The line exceeded the maximum line size and was cut
    pub truncated: bool,
}

/// Everything flowing from the prospector and harvesters to the spooler.
///
/// All producers share one channel, so registry commands stay ordered relative
/// to the records they relate to.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    Record(Record),
    /// Harvester detected truncation and restarted at offset 0
    Truncated { file_id: FileId, path: PathBuf },
    /// Prospector started harvesting a file
    Discovered {
        file_id: FileId,
        path: PathBuf,
        fingerprint: Option<Fingerprint>,
        offset: u64,
        replace: bool,
    },
    /// A harvested file was renamed
    Renamed { file_id: FileId, path: PathBuf },
    /// Harvester read enough of a file to fingerprint more of its content
    Fingerprinted {
        file_id: FileId,
        fingerprint: Fingerprint,
    },
    /// A file has been gone longer than the grace period
    Forget { file_id: FileId },
}
