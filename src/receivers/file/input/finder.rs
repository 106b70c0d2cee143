// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

use crate::receivers::file::error::{Error, Result};

/// FileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl FileFinder {
    /// Create a new FileFinder, all patterns are validated up front
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern)
                .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    /// Find all regular files matching the include patterns, minus the excluded
    /// ones. A path matched by several patterns is returned once. Entries that
    /// cannot be read (permissions, races with deletion) are skipped.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable glob entry");
                        continue;
                    }
                };

                if path.is_dir() {
                    continue;
                }

                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["test1.log", "test2.log", "other.txt", "ignored.log"] {
            fs::write(dir.path().join(name), format!("content of {}\n", name)).unwrap();
        }
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3); // test1.log, test2.log, ignored.log
    }

    #[test]
    fn test_finder_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/ignored.*", dir.path().display());
        let finder = FileFinder::new(vec![include], vec![exclude]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(
            !files
                .iter()
                .any(|p| p.file_name().unwrap() == "ignored.log")
        );
    }

    #[test]
    fn test_finder_overlapping_patterns_dedupe() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let all_logs = format!("{}/*.log", dir.path().display());
        let test_logs = format!("{}/test*", dir.path().display());
        let finder = FileFinder::new(vec![all_logs, test_logs], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        // test1.log and test2.log match both patterns
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_finder_skips_directories() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);
        fs::create_dir(dir.path().join("archive.log")).unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_finder_discovers_new_files() {
        let dir = TempDir::new().unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], vec![]).unwrap();

        assert!(finder.find_files().unwrap().is_empty());

        fs::write(dir.path().join("first.log"), "first log entry\n").unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files, vec![dir.path().join("first.log")]);
    }

    #[test]
    fn test_finder_invalid_pattern() {
        let err = FileFinder::new(vec!["/var/log/[".to_string()], vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob(_)));

        let err = FileFinder::new(vec!["/var/log/*.log".to_string()], vec!["[".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGlob(_)));
    }

    #[test]
    fn test_finder_empty_include() {
        let finder = FileFinder::new(vec![], vec![]).unwrap();
        assert!(finder.find_files().unwrap().is_empty());
    }
}
