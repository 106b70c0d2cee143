// SPDX-License-Identifier: Apache-2.0

//! Durable map from file identity to the last acknowledged read offset.
//!
//! The registry has a single writer, the spooler task, which applies offset
//! advances only after the sink acknowledged the corresponding records. Other
//! tasks work from [`FileRegistry::snapshot`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::receivers::file::config::CorruptRegistryPolicy;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileId, Fingerprint};
use crate::receivers::file::persistence::{JsonFileStore, PersistedEntryV1, RegistryDocumentV1};

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub file_id: FileId,
    /// Last known path
    pub path: PathBuf,
    /// Next unread byte
    pub offset: u64,
    pub fingerprint: Option<Fingerprint>,
    pub updated_at: DateTime<Utc>,
}

/// Point in time copy of all entries.
pub type RegistrySnapshot = HashMap<FileId, RegistryEntry>;

/// Result of [`FileRegistry::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created,
    Advanced,
    /// Same offset as stored, only the path binding was refreshed
    Unchanged,
    /// Lower than the stored offset, ignored
    Stale,
}

#[derive(Debug)]
pub struct FileRegistry {
    store: JsonFileStore,
    entries: HashMap<FileId, RegistryEntry>,
    dirty: bool,
}

impl FileRegistry {
    /// Load the registry at `path`. A missing file yields an empty registry.
    pub fn open(path: impl Into<PathBuf>, policy: CorruptRegistryPolicy) -> Result<Self> {
        let store = JsonFileStore::new(path);

        let loaded = match store.load() {
            Ok(loaded) => loaded.unwrap_or_default(),
            Err(Error::CorruptRegistry { path, reason })
                if policy == CorruptRegistryPolicy::Reset =>
            {
                let moved = store.move_aside()?;
                warn!(
                    path = ?path,
                    moved_to = ?moved,
                    reason = %reason,
                    "Registry is corrupt, starting with an empty registry. Files will be re-read from the beginning."
                );
                Default::default()
            }
            Err(e) => return Err(e),
        };

        let entries: HashMap<_, _> = loaded
            .entries
            .into_iter()
            .map(|e| {
                let file_id = e.file_id();
                (
                    file_id,
                    RegistryEntry {
                        file_id,
                        path: PathBuf::from(e.path),
                        offset: e.offset,
                        fingerprint: e.fingerprint,
                        updated_at: e.updated_at,
                    },
                )
            })
            .collect();

        info!(
            path = ?store.path(),
            entries = entries.len(),
            skipped = loaded.skipped,
            "Loaded file registry."
        );

        Ok(Self {
            store,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, file_id: &FileId) -> Option<u64> {
        self.entries.get(file_id).map(|e| e.offset)
    }

    pub fn entry(&self, file_id: &FileId) -> Option<&RegistryEntry> {
        self.entries.get(file_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when there are changes that have not been persisted yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Advance the offset of a file. Offsets never move backwards here, an
    /// explicit [`FileRegistry::reset`] is the only way to rewind. `path` is
    /// only used when the entry is created.
    pub fn update(&mut self, file_id: FileId, path: &Path, offset: u64) -> UpdateOutcome {
        let now = Utc::now();
        match self.entries.get_mut(&file_id) {
            None => {
                self.entries.insert(
                    file_id,
                    RegistryEntry {
                        file_id,
                        path: path.to_path_buf(),
                        offset,
                        fingerprint: None,
                        updated_at: now,
                    },
                );
                self.dirty = true;
                UpdateOutcome::Created
            }
            Some(entry) if offset < entry.offset => {
                debug!(
                    file_id = %file_id,
                    offset,
                    stored = entry.offset,
                    "Ignoring stale offset update."
                );
                UpdateOutcome::Stale
            }
            Some(entry) => {
                let outcome = if offset > entry.offset {
                    UpdateOutcome::Advanced
                } else {
                    UpdateOutcome::Unchanged
                };
                // The path binding belongs to rename, a record may still carry
                // the name the file had before.
                if outcome == UpdateOutcome::Advanced {
                    entry.offset = offset;
                    entry.updated_at = now;
                    self.dirty = true;
                }
                outcome
            }
        }
    }

    /// Rewind a truncated file to the beginning. The stored fingerprint
    /// described the content before truncation and is dropped.
    pub fn reset(&mut self, file_id: FileId, path: &Path) {
        let now = Utc::now();
        let entry = self.entries.entry(file_id).or_insert_with(|| RegistryEntry {
            file_id,
            path: path.to_path_buf(),
            offset: 0,
            fingerprint: None,
            updated_at: now,
        });
        entry.offset = 0;
        entry.path = path.to_path_buf();
        entry.fingerprint = None;
        entry.updated_at = now;
        self.dirty = true;
    }

    /// Record a newly discovered file. With `replace` set, any existing entry
    /// for the identity belonged to a previous file (inode reuse) and is
    /// overwritten. Otherwise an existing entry keeps its offset.
    pub fn discover(
        &mut self,
        file_id: FileId,
        path: &Path,
        fingerprint: Option<Fingerprint>,
        offset: u64,
        replace: bool,
    ) {
        let now = Utc::now();
        match self.entries.get_mut(&file_id) {
            Some(entry) if !replace => {
                entry.path = path.to_path_buf();
                // A longer fingerprint of the same content identifies the file better
                let longer = match (&entry.fingerprint, &fingerprint) {
                    (None, Some(_)) => true,
                    (Some(old), Some(new)) => new.len() > old.len(),
                    _ => false,
                };
                if longer {
                    entry.fingerprint = fingerprint;
                }
                entry.updated_at = now;
            }
            _ => {
                if replace && self.entries.contains_key(&file_id) {
                    info!(
                        file_id = %file_id,
                        path = ?path,
                        "File identity was reused by a new file, replacing registry entry."
                    );
                }
                self.entries.insert(
                    file_id,
                    RegistryEntry {
                        file_id,
                        path: path.to_path_buf(),
                        offset,
                        fingerprint,
                        updated_at: now,
                    },
                );
            }
        }
        self.dirty = true;
    }

    /// Update the path binding of a file without touching its offset.
    pub fn rename(&mut self, file_id: FileId, path: &Path) {
        if let Some(entry) = self.entries.get_mut(&file_id) {
            if entry.path != path {
                entry.path = path.to_path_buf();
                entry.updated_at = Utc::now();
                self.dirty = true;
            }
        }
    }

    pub fn forget(&mut self, file_id: &FileId) -> Option<RegistryEntry> {
        let removed = self.entries.remove(file_id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Replace the fingerprint of a harvested file once more of its content
    /// is known.
    pub fn set_fingerprint(&mut self, file_id: FileId, fingerprint: Fingerprint) {
        if let Some(entry) = self.entries.get_mut(&file_id) {
            if entry.fingerprint.as_ref() != Some(&fingerprint) {
                entry.fingerprint = Some(fingerprint);
                entry.updated_at = Utc::now();
                self.dirty = true;
            }
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::new(self.entries.clone())
    }

    /// Durably write the registry if it changed since the last persist.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut doc = RegistryDocumentV1::default();
        for entry in self.entries.values() {
            let persisted = PersistedEntryV1::new(
                entry.file_id,
                &entry.path,
                entry.offset,
                entry.fingerprint.clone(),
                entry.updated_at,
            );
            doc.files.insert(persisted.key(), persisted);
        }

        self.store.store(&doc)?;
        self.dirty = false;
        debug!(entries = self.entries.len(), "Persisted file registry.");
        Ok(())
    }
}
