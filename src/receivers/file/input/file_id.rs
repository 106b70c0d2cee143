// SPDX-License-Identifier: Apache-2.0

//! Stable file identity based on inode (Unix) or file index (Windows).
//!
//! The identity survives renames, so a rotated file keeps its registry entry
//! and its harvester.

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

/// Device + inode on Unix, volume serial + file index on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Identity of an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Registry key, `dev:ino`.
    pub fn to_key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

impl std::str::FromStr for FileId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dev, ino) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid file id '{}', expected dev:ino", s))?;
        let dev = dev
            .parse()
            .map_err(|e| format!("invalid device in file id '{}': {}", s, e))?;
        let ino = ino
            .parse()
            .map_err(|e| format!("invalid inode in file id '{}': {}", s, e))?;
        Ok(Self { dev, ino })
    }
}

/// True when the file behind the metadata has been unlinked from every directory.
#[cfg(unix)]
pub(crate) fn is_unlinked(metadata: &Metadata, _path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    metadata.nlink() == 0
}

#[cfg(not(unix))]
pub(crate) fn is_unlinked(_metadata: &Metadata, path: &Path) -> bool {
    !path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_id_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let f = file.reopen().unwrap();
        let id = FileId::from_file(&f).unwrap();

        assert!(id.dev() > 0 || id.ino() > 0);
        assert_eq!(id, FileId::from_path(file.path()).unwrap());
    }

    #[test]
    fn test_file_id_different_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_file_id_stable_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\n").unwrap();

        let id1 = FileId::from_path(&path).unwrap();

        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).unwrap();

        let id2 = FileId::from_path(&rotated).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_file_id_key_roundtrip() {
        let id = FileId::new(123, 456);
        assert_eq!(id.to_key(), "123:456");
        assert_eq!("123:456".parse::<FileId>().unwrap(), id);

        assert!("123".parse::<FileId>().is_err());
        assert!("abc:456".parse::<FileId>().is_err());
        assert!("123:".parse::<FileId>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_is_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.log");
        std::fs::write(&path, "x\n").unwrap();

        let f = File::open(&path).unwrap();
        assert!(!is_unlinked(&f.metadata().unwrap(), &path));

        std::fs::remove_file(&path).unwrap();
        assert!(is_unlinked(&f.metadata().unwrap(), &path));
    }
}
