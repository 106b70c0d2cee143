// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use super::schema::{PersistedEntryV1, REGISTRY_VERSION, RawRegistryDocument, RegistryDocumentV1};
use crate::receivers::file::error::{Error, Result};

/// Entries decoded from a registry file.
#[derive(Debug, Default)]
pub struct LoadedRegistry {
    pub entries: Vec<PersistedEntryV1>,
    /// Entries that could not be decoded and were dropped
    pub skipped: usize,
}

/// A JSON document on disk, replaced atomically on every store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry. Returns `None` when no registry has been written yet,
    /// `Error::CorruptRegistry` when the document cannot be understood, and
    /// `Error::Io` when the file exists but cannot be read.
    pub fn load(&self) -> Result<Option<LoadedRegistry>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let raw: RawRegistryDocument =
            serde_json::from_str(&data).map_err(|e| Error::CorruptRegistry {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if raw.version == 0 {
            return Err(Error::CorruptRegistry {
                path: self.path.clone(),
                reason: "unsupported registry version 0".to_string(),
            });
        }
        if raw.version > REGISTRY_VERSION {
            warn!(
                path = ?self.path,
                version = raw.version,
                supported = REGISTRY_VERSION,
                "Registry was written by a newer version, reading the entries it shares with this one."
            );
        }

        let mut loaded = LoadedRegistry::default();
        for (key, value) in raw.files {
            match serde_json::from_value::<PersistedEntryV1>(value) {
                Ok(entry) if entry.key() == key => loaded.entries.push(entry),
                Ok(entry) => {
                    warn!(
                        key = %key,
                        entry_key = %entry.key(),
                        "Registry entry key does not match its identity, skipping."
                    );
                    loaded.skipped += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to decode registry entry, skipping.");
                    loaded.skipped += 1;
                }
            }
        }

        Ok(Some(loaded))
    }

    pub fn store(&self, doc: &RegistryDocumentV1) -> Result<()> {
        atomic_write(&self.path, doc)
    }

    /// Move an unusable registry out of the way, returning its new location.
    pub fn move_aside(&self) -> Result<PathBuf> {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry".into());
        name.push(".corrupt");
        let target = self.path.with_file_name(name);

        fs::rename(&self.path, &target).map_err(|e| {
            Error::Persistence(format!(
                "failed to move corrupt registry {} aside: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(target)
    }
}

/// Write the document to a temp file, fsync it, then rename over the target.
fn atomic_write(path: &Path, doc: &RegistryDocumentV1) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_synced(&temp_path, doc).and_then(|()| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename registry file: {}", e)))
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    sync_parent_dir(path);
    Ok(())
}

fn write_synced(temp_path: &Path, doc: &RegistryDocumentV1) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, doc)
        .map_err(|e| Error::Persistence(format!("failed to write registry: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e)))?;

    let file = writer
        .into_inner()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e.error())))?;
    file.sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync registry: {}", e)))
}

// Makes the rename itself durable, best effort.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
