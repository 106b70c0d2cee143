// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::receivers::file::input::{FileId, Fingerprint};
use crate::receivers::file::{FileEvent, FileRegistry, Record};

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub max_size: usize,
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 2048,
            timeout: Duration::from_millis(200),
        }
    }
}

/// Registry change that becomes effective once the batch it rides with is
/// acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryOp {
    Advance {
        file_id: FileId,
        path: Arc<Path>,
        offset: u64,
    },
    Reset {
        file_id: FileId,
        path: PathBuf,
    },
    Discover {
        file_id: FileId,
        path: PathBuf,
        fingerprint: Option<Fingerprint>,
        offset: u64,
        replace: bool,
    },
    Rename {
        file_id: FileId,
        path: PathBuf,
    },
    Fingerprint {
        file_id: FileId,
        fingerprint: Fingerprint,
    },
    Forget {
        file_id: FileId,
    },
}

impl RegistryOp {
    fn apply(self, registry: &mut FileRegistry) {
        match self {
            RegistryOp::Advance {
                file_id,
                path,
                offset,
            } => {
                registry.update(file_id, &path, offset);
            }
            RegistryOp::Reset { file_id, path } => registry.reset(file_id, &path),
            RegistryOp::Discover {
                file_id,
                path,
                fingerprint,
                offset,
                replace,
            } => registry.discover(file_id, &path, fingerprint, offset, replace),
            RegistryOp::Rename { file_id, path } => registry.rename(file_id, &path),
            RegistryOp::Fingerprint {
                file_id,
                fingerprint,
            } => registry.set_fingerprint(file_id, fingerprint),
            RegistryOp::Forget { file_id } => {
                registry.forget(&file_id);
            }
        }
    }
}

/// Records to publish together with the registry changes they carry.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<Record>,
    pub ledger: Vec<RegistryOp>,
}

impl Batch {
    /// Apply the ledger in arrival order. Only call after the sink
    /// acknowledged `records`.
    pub fn apply_to(self, registry: &mut FileRegistry) {
        for op in self.ledger {
            op.apply(registry);
        }
    }
}

/// Accumulates events until the batch is full or the timeout expires.
///
/// Consecutive offset advances of a file are folded into one ledger entry.
/// Any other op for that file ends the run, so a reset is never reordered
/// with the advances around it.
pub struct RecordBatch {
    records: Vec<Record>,
    ledger: Vec<RegistryOp>,
    last_advance: HashMap<FileId, usize>,
    max_size: usize,
    timeout: Duration,
    last_flush: Instant,
}

impl RecordBatch {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            records: Vec::with_capacity(config.max_size),
            ledger: Vec::new(),
            last_advance: HashMap::new(),
            max_size: config.max_size.max(1),
            timeout: config.timeout,
            last_flush: Instant::now(),
        }
    }

    pub fn offer(&mut self, event: FileEvent) {
        match event {
            FileEvent::Record(record) => {
                if self.records.is_empty() {
                    self.last_flush = Instant::now();
                }
                self.advance(record.file_id, record.source.clone(), record.offset);
                self.records.push(record);
            }
            FileEvent::Truncated { file_id, path } => {
                self.barrier(RegistryOp::Reset { file_id, path });
            }
            FileEvent::Discovered {
                file_id,
                path,
                fingerprint,
                offset,
                replace,
            } => self.barrier(RegistryOp::Discover {
                file_id,
                path,
                fingerprint,
                offset,
                replace,
            }),
            FileEvent::Renamed { file_id, path } => {
                self.barrier(RegistryOp::Rename { file_id, path });
            }
            FileEvent::Fingerprinted {
                file_id,
                fingerprint,
            } => self.barrier(RegistryOp::Fingerprint {
                file_id,
                fingerprint,
            }),
            FileEvent::Forget { file_id } => self.barrier(RegistryOp::Forget { file_id }),
        }
    }

    fn advance(&mut self, file_id: FileId, source: Arc<Path>, new_offset: u64) {
        if let Some(idx) = self.last_advance.get(&file_id) {
            if let Some(RegistryOp::Advance { path, offset, .. }) = self.ledger.get_mut(*idx) {
                *path = source;
                *offset = new_offset;
                return;
            }
        }
        self.last_advance.insert(file_id, self.ledger.len());
        self.ledger.push(RegistryOp::Advance {
            file_id,
            path: source,
            offset: new_offset,
        });
    }

    fn barrier(&mut self, op: RegistryOp) {
        let file_id = match &op {
            RegistryOp::Advance { file_id, .. }
            | RegistryOp::Reset { file_id, .. }
            | RegistryOp::Discover { file_id, .. }
            | RegistryOp::Rename { file_id, .. }
            | RegistryOp::Fingerprint { file_id, .. }
            | RegistryOp::Forget { file_id } => *file_id,
        };
        self.last_advance.remove(&file_id);
        self.ledger.push(op);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }

    /// No records and no pending registry ops
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.ledger.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_size
    }

    /// When the pending records must be flushed at the latest.
    pub fn deadline(&self) -> Option<Instant> {
        self.has_records().then(|| self.last_flush + self.timeout)
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    pub fn take(&mut self) -> Batch {
        self.last_advance.clear();
        self.last_flush = Instant::now();
        Batch {
            records: std::mem::replace(&mut self.records, Vec::with_capacity(self.max_size)),
            ledger: std::mem::take(&mut self.ledger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::config::CorruptRegistryPolicy;
    use tempfile::TempDir;

    fn record(file_id: FileId, path: &str, line: &str, offset: u64) -> FileEvent {
        FileEvent::Record(Record {
            file_id,
            source: Arc::from(Path::new(path)),
            line: line.to_string(),
            read_at: chrono::Utc::now(),
            offset,
            truncated: false,
        })
    }

    fn config(max_size: usize) -> BatchConfig {
        BatchConfig {
            max_size,
            timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_advances_are_coalesced_per_file() {
        let a = FileId::new(1, 1);
        let b = FileId::new(1, 2);
        let mut batch = RecordBatch::new(&config(10));

        batch.offer(record(a, "/a", "a1", 3));
        batch.offer(record(b, "/b", "b1", 3));
        batch.offer(record(a, "/a", "a2", 6));
        batch.offer(record(a, "/a", "a3", 9));

        assert_eq!(batch.len(), 4);
        let taken = batch.take();
        assert_eq!(taken.records.len(), 4);
        assert_eq!(
            taken.ledger,
            vec![
                RegistryOp::Advance {
                    file_id: a,
                    path: Arc::from(Path::new("/a")),
                    offset: 9
                },
                RegistryOp::Advance {
                    file_id: b,
                    path: Arc::from(Path::new("/b")),
                    offset: 3
                },
            ]
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn test_reset_splits_advances() {
        let a = FileId::new(1, 1);
        let mut batch = RecordBatch::new(&config(10));

        batch.offer(record(a, "/a", "old", 40));
        batch.offer(FileEvent::Truncated {
            file_id: a,
            path: PathBuf::from("/a"),
        });
        batch.offer(record(a, "/a", "new", 4));

        let ledger = batch.take().ledger;
        assert_eq!(ledger.len(), 3);
        assert!(matches!(ledger[0], RegistryOp::Advance { offset: 40, .. }));
        assert!(matches!(ledger[1], RegistryOp::Reset { .. }));
        assert!(matches!(ledger[2], RegistryOp::Advance { offset: 4, .. }));
    }

    #[test]
    fn test_full_and_deadline() {
        let a = FileId::new(1, 1);
        let mut batch = RecordBatch::new(&config(2));
        assert!(batch.deadline().is_none());

        batch.offer(FileEvent::Forget { file_id: a });
        assert!(!batch.is_empty());
        assert!(!batch.has_records());
        assert!(batch.deadline().is_none());

        batch.offer(record(a, "/a", "1", 2));
        assert!(!batch.is_full());
        let deadline = batch.deadline().unwrap();
        assert!(!batch.should_flush(Instant::now()));
        assert!(batch.should_flush(deadline));

        batch.offer(record(a, "/a", "2", 4));
        assert!(batch.is_full());
    }

    #[test]
    fn test_apply_ledger_in_order() {
        let dir = TempDir::new().unwrap();
        let mut registry =
            FileRegistry::open(dir.path().join("registry.json"), CorruptRegistryPolicy::Fail)
                .unwrap();

        let a = FileId::new(1, 1);
        let mut batch = RecordBatch::new(&config(10));
        batch.offer(FileEvent::Discovered {
            file_id: a,
            path: PathBuf::from("/a"),
            fingerprint: None,
            offset: 0,
            replace: false,
        });
        batch.offer(record(a, "/a", "x", 30));
        batch.offer(FileEvent::Truncated {
            file_id: a,
            path: PathBuf::from("/a"),
        });
        batch.offer(record(a, "/a", "y", 2));
        batch.offer(FileEvent::Renamed {
            file_id: a,
            path: PathBuf::from("/a.1"),
        });
        batch.offer(FileEvent::Fingerprinted {
            file_id: a,
            fingerprint: Fingerprint::from_bytes(b"y\n"),
        });

        batch.take().apply_to(&mut registry);

        let entry = registry.entry(&a).unwrap();
        assert_eq!(entry.offset, 2);
        assert_eq!(entry.path, PathBuf::from("/a.1"));
        assert_eq!(entry.fingerprint, Some(Fingerprint::from_bytes(b"y\n")));

        let mut batch = RecordBatch::new(&config(10));
        batch.offer(FileEvent::Forget { file_id: a });
        batch.take().apply_to(&mut registry);
        assert!(registry.entry(&a).is_none());
    }
}
