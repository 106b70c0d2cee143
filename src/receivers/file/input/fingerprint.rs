// SPDX-License-Identifier: Apache-2.0

use cityhash_rs::cityhash_102_128;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A fingerprint identifies file content by a hash of its first bytes.
///
/// It is used to tell a reused inode apart from the file that was previously
/// tracked under the same identity. The fingerprint of a small file stays valid
/// as the file grows, since only the first `len` bytes are compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    len: u64,
    hash: String,
}

impl Fingerprint {
    /// Fingerprint the first `size` bytes of a file. Empty files have no fingerprint.
    pub fn from_file(file: &mut File, size: usize) -> io::Result<Option<Self>> {
        let buf = read_prefix(file, size)?;
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::from_bytes(&buf)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len() as u64,
            hash: format!("{:032x}", cityhash_102_128(bytes)),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check whether the file still starts with the fingerprinted bytes. A file
    /// shorter than the fingerprint does not match.
    pub fn matches(&self, file: &mut File) -> io::Result<bool> {
        let buf = read_prefix(file, self.len as usize)?;
        if (buf.len() as u64) < self.len {
            return Ok(false);
        }
        Ok(Self::from_bytes(&buf).hash == self.hash)
    }
}

fn read_prefix(file: &mut File, size: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;

    let mut buf = Vec::with_capacity(size);
    file.by_ref().take(size as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_fingerprint_truncates_to_size() {
        let file = file_with(b"hello world this is a longer message");

        let mut f = file.reopen().unwrap();
        let fp = Fingerprint::from_file(&mut f, 5).unwrap().unwrap();

        assert_eq!(fp.len(), 5);
        assert_eq!(fp, Fingerprint::from_bytes(b"hello"));
    }

    #[test]
    fn test_fingerprint_empty_file() {
        let file = file_with(b"");
        let mut f = file.reopen().unwrap();
        assert!(Fingerprint::from_file(&mut f, 1024).unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_matches_grown_file() {
        let mut file = file_with(b"first line\n");
        let mut f = file.reopen().unwrap();
        let fp = Fingerprint::from_file(&mut f, 1024).unwrap().unwrap();
        assert_eq!(fp.len(), 11);

        file.write_all(b"second line\n").unwrap();
        file.flush().unwrap();

        let mut f = file.reopen().unwrap();
        assert!(fp.matches(&mut f).unwrap());
    }

    #[test]
    fn test_fingerprint_rejects_different_content() {
        let file = file_with(b"first line\n");
        let mut f = file.reopen().unwrap();
        let fp = Fingerprint::from_file(&mut f, 1024).unwrap().unwrap();

        let other = file_with(b"other line\n");
        let mut f = other.reopen().unwrap();
        assert!(!fp.matches(&mut f).unwrap());

        // Shorter than the fingerprint, e.g. after truncation
        let short = file_with(b"first");
        let mut f = short.reopen().unwrap();
        assert!(!fp.matches(&mut f).unwrap());
    }

    #[test]
    fn test_fingerprint_serde() {
        let fp = Fingerprint::from_bytes(b"some bytes");
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.contains("\"len\":10"));
        let fp2: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, fp2);
    }
}
