// SPDX-License-Identifier: Apache-2.0

//! Persisted registry schema.
//!
//! The document is a versioned JSON object keyed by `dev:ino`. Unknown fields
//! are ignored on load so newer writers stay readable.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::receivers::file::input::{FileId, Fingerprint};

/// Current schema version for persisted state
pub const REGISTRY_VERSION: u8 = 1;

/// Whole registry document (v1)
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryDocumentV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// Map from file key (dev:ino) to file entry
    pub files: HashMap<String, PersistedEntryV1>,
}

impl Default for RegistryDocumentV1 {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            files: HashMap::new(),
        }
    }
}

/// Document as read from disk, entries are decoded one by one so a single bad
/// entry does not discard the rest.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRegistryDocument {
    pub version: u8,
    #[serde(default)]
    pub files: HashMap<String, serde_json::Value>,
}

/// Persisted state for a single file (v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntryV1 {
    /// Last known path to the file
    pub path: String,
    /// Last known filename, for humans reading the file
    #[serde(default)]
    pub filename: String,

    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,

    /// Next unread byte
    pub offset: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,

    pub updated_at: DateTime<Utc>,
}

impl PersistedEntryV1 {
    pub fn new(
        file_id: FileId,
        path: &Path,
        offset: u64,
        fingerprint: Option<Fingerprint>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dev: file_id.dev(),
            ino: file_id.ino(),
            offset,
            fingerprint,
            updated_at,
        }
    }

    pub fn file_id(&self) -> FileId {
        FileId::new(self.dev, self.ino)
    }

    /// Generate the map key for this entry ("dev:ino" format)
    pub fn key(&self) -> String {
        self.file_id().to_key()
    }
}
