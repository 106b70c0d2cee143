// SPDX-License-Identifier: Apache-2.0

//! Periodically resolves the configured patterns and keeps one harvester
//! running per matching file.
//!
//! Files are tracked by identity, so a rename keeps its harvester and its
//! offset. Registry commands (discovery, renames, cleanup) go through the same
//! channel as the records, the spooler applies them in order.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::select;
use tokio::sync::{oneshot, watch};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::FileReceiverConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::harvester::{ExitReason, Harvester, HarvesterConfig, HarvesterExit};
use crate::receivers::file::input::{FileFinder, FileId, Fingerprint, StartAt};
use crate::receivers::file::record::FileEvent;
use crate::receivers::file::registry::RegistrySnapshot;

struct ActiveHarvester {
    path: PathBuf,
    path_tx: watch::Sender<PathBuf>,
    close: CancellationToken,
    start_offset: u64,
    fingerprint: Option<Fingerprint>,
    unmatched_since: Option<Instant>,
}

/// A file with state but without a running harvester
#[derive(Debug, Clone)]
struct KnownFile {
    path: PathBuf,
    offset: u64,
    fingerprint: Option<Fingerprint>,
    vanished_since: Option<Instant>,
}

struct Candidate {
    path: PathBuf,
    file_id: FileId,
    // Only set for files without a running harvester
    opened: Option<OpenedFile>,
}

struct OpenedFile {
    file: File,
    size: u64,
    fingerprint: Option<Fingerprint>,
    // None when nothing is known about this identity
    known_matches: Option<bool>,
}

pub struct Prospector {
    config: Arc<FileReceiverConfig>,
    harvester_config: Arc<HarvesterConfig>,
    finder: FileFinder,
    events: BoundedSender<FileEvent>,
    cancel: CancellationToken,
    active: HashMap<FileId, ActiveHarvester>,
    known: HashMap<FileId, KnownFile>,
    harvesters: JoinSet<HarvesterExit>,
    task_files: HashMap<Id, FileId>,
    ready: Option<oneshot::Sender<()>>,
    first_scan: bool,
    scan_first_failure: Option<Instant>,
}

impl Prospector {
    /// Create a prospector that resumes from the given registry state.
    pub fn new(
        config: Arc<FileReceiverConfig>,
        snapshot: &RegistrySnapshot,
        events: BoundedSender<FileEvent>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let finder = FileFinder::new(config.include.clone(), config.exclude.clone())?;

        let known = snapshot
            .values()
            .map(|entry| {
                (
                    entry.file_id,
                    KnownFile {
                        path: entry.path.clone(),
                        offset: entry.offset,
                        fingerprint: entry.fingerprint.clone(),
                        vanished_since: None,
                    },
                )
            })
            .collect();

        Ok(Self {
            harvester_config: Arc::new(HarvesterConfig::from(config.as_ref())),
            config,
            finder,
            events,
            cancel,
            active: HashMap::new(),
            known,
            harvesters: JoinSet::new(),
            task_files: HashMap::new(),
            ready: None,
            first_scan: true,
            scan_first_failure: None,
        })
    }

    /// Signalled once the first scan completed and its harvesters are started.
    pub fn with_ready(mut self, ready: oneshot::Sender<()>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub async fn run(mut self) -> std::result::Result<(), BoxError> {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(res) = self.harvesters.join_next_with_id(), if !self.harvesters.is_empty() => {
                    self.reap(res);
                }

                _ = interval.tick() => {
                    if let Err(e) = self.scan().await {
                        let first_failure = *self.scan_first_failure.get_or_insert_with(Instant::now);
                        let failing_for = first_failure.elapsed();
                        if failing_for >= self.config.max_scan_failure_duration {
                            error!(error = %e, "Scan failures persisted beyond threshold, exiting.");
                            self.cancel.cancel();
                            self.shutdown().await;
                            return Err(e.into());
                        }
                        warn!(error = %e, failing_for = ?failing_for, "Scan failed, retrying at next interval.");
                        continue;
                    }
                    if self.scan_first_failure.take().is_some() {
                        info!("Scan succeeded after previous failures.");
                    }
                    self.first_scan = false;
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(());
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn scan(&mut self) -> Result<()> {
        let finder = self.finder.clone();
        let fingerprint_size = self.config.fingerprint_size;
        let active: HashSet<FileId> = self.active.keys().copied().collect();
        let known: HashMap<FileId, Option<Fingerprint>> = self
            .known
            .iter()
            .map(|(id, k)| (*id, k.fingerprint.clone()))
            .collect();

        let candidates = tokio::task::spawn_blocking(move || {
            collect_candidates(&finder, fingerprint_size, &active, &known)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        let now = Instant::now();
        let mut matched = HashSet::new();
        let mut renamed = Vec::new();

        for candidate in candidates {
            matched.insert(candidate.file_id);

            if let Some(active) = self.active.get_mut(&candidate.file_id) {
                active.unmatched_since = None;
                if active.path != candidate.path {
                    info!(
                        file_id = %candidate.file_id,
                        from = ?active.path,
                        to = ?candidate.path,
                        "File was renamed, continuing to harvest it."
                    );
                    active.path = candidate.path.clone();
                    let _ = active.path_tx.send(candidate.path.clone());
                    renamed.push((candidate.file_id, candidate.path));
                }
                continue;
            }

            if let Some(opened) = candidate.opened {
                self.start_harvester(candidate.file_id, candidate.path, opened)
                    .await?;
            }
        }

        for (file_id, path) in renamed {
            self.send(FileEvent::Renamed { file_id, path }).await?;
        }

        // Harvesters of deleted files stop by themselves, files that were only
        // renamed out of the patterns keep being read unless close_renamed is set.
        for (file_id, active) in self.active.iter_mut() {
            if matched.contains(file_id) {
                continue;
            }
            let since = *active.unmatched_since.get_or_insert(now);
            let Some(delay) = self.config.close_renamed else {
                continue;
            };
            if now.duration_since(since) >= delay && !active.close.is_cancelled() {
                info!(
                    file_id = %file_id,
                    path = ?active.path,
                    "File no longer matches any pattern, closing it."
                );
                active.close.cancel();
            }
        }

        let mut forget = Vec::new();
        for (file_id, known) in self.known.iter_mut() {
            if matched.contains(file_id) {
                known.vanished_since = None;
                continue;
            }
            let since = *known.vanished_since.get_or_insert(now);
            if let Some(grace) = self.config.clean_removed {
                if now.duration_since(since) >= grace {
                    forget.push(*file_id);
                }
            }
        }
        for file_id in forget {
            if let Some(known) = self.known.remove(&file_id) {
                debug!(
                    file_id = %file_id,
                    path = ?known.path,
                    "File has been gone for the grace period, dropping its state."
                );
            }
            self.send(FileEvent::Forget { file_id }).await?;
        }

        Ok(())
    }

    async fn start_harvester(
        &mut self,
        file_id: FileId,
        path: PathBuf,
        opened: OpenedFile,
    ) -> Result<()> {
        let known = self.known.remove(&file_id);

        let (offset, replace) = match (opened.known_matches, known) {
            (Some(true), Some(known)) => (known.offset, false),
            (Some(false), _) => {
                info!(
                    file_id = %file_id,
                    path = ?path,
                    "File identity belongs to a new file, reading it from the beginning."
                );
                (0, true)
            }
            _ => match self.config.start_at {
                StartAt::End if self.first_scan => (opened.size, false),
                _ => (0, false),
            },
        };

        self.send(FileEvent::Discovered {
            file_id,
            path: path.clone(),
            fingerprint: opened.fingerprint.clone(),
            offset,
            replace,
        })
        .await?;

        let (path_tx, path_rx) = watch::channel(path.clone());
        let close = CancellationToken::new();

        let harvester = Harvester::new(
            file_id,
            opened.file,
            path.clone(),
            offset,
            self.harvester_config.clone(),
            self.events.clone(),
        )
        .with_path_updates(path_rx)
        .with_fingerprint(opened.fingerprint.clone())
        .with_stop(self.cancel.child_token())
        .with_close(close.clone());

        let handle = self.harvesters.spawn(harvester.run());
        self.task_files.insert(handle.id(), file_id);

        info!(file_id = %file_id, path = ?path, offset, "Started harvesting file.");

        self.active.insert(
            file_id,
            ActiveHarvester {
                path,
                path_tx,
                close,
                start_offset: offset,
                fingerprint: opened.fingerprint,
                unmatched_since: None,
            },
        );

        Ok(())
    }

    fn reap(&mut self, res: std::result::Result<(Id, HarvesterExit), JoinError>) {
        let (task_id, exit) = match res {
            Ok((task_id, exit)) => (task_id, Some(exit)),
            Err(e) => {
                error!(error = %e, "Harvester task failed.");
                (e.id(), None)
            }
        };

        let Some(file_id) = self.task_files.remove(&task_id) else {
            return;
        };
        let Some(active) = self.active.remove(&file_id) else {
            return;
        };

        let (path, offset, fingerprint) = match exit {
            Some(exit) => {
                match &exit.reason {
                    ExitReason::Error(e) => warn!(
                        file_id = %file_id,
                        path = ?exit.path,
                        error = %e,
                        "Harvester failed, retrying on the next scan if the file still matches."
                    ),
                    reason => debug!(
                        file_id = %file_id,
                        path = ?exit.path,
                        reason = ?reason,
                        "Harvester finished."
                    ),
                }
                (exit.path, exit.offset, exit.fingerprint)
            }
            // Unknown progress, re-read from where it started
            None => (active.path, active.start_offset, active.fingerprint),
        };

        self.known.insert(
            file_id,
            KnownFile {
                path,
                offset,
                fingerprint,
                vanished_since: None,
            },
        );
    }

    async fn shutdown(&mut self) {
        let count = self.harvesters.len();
        // Harvester stop tokens are children of ours and already cancelled
        while let Some(res) = self.harvesters.join_next_with_id().await {
            self.reap(res);
        }
        info!(harvesters = count, "Prospector stopped.");
    }

    async fn send(&self, event: FileEvent) -> Result<()> {
        select! {
            biased;
            r = self.events.send(event) => r.map_err(|_| Error::ChannelSend),
            // Registry commands are recomputed on the next start
            _ = self.cancel.cancelled() => Ok(()),
        }
    }
}

/// Open every matching file and work out its identity. Only files without a
/// running harvester are fingerprinted.
fn collect_candidates(
    finder: &FileFinder,
    fingerprint_size: usize,
    active: &HashSet<FileId>,
    known: &HashMap<FileId, Option<Fingerprint>>,
) -> Result<Vec<Candidate>> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for path in finder.find_files()? {
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = ?path, error = %e, "Cannot open matching file, skipping.");
                continue;
            }
        };
        let file_id = match FileId::from_file(&file) {
            Ok(id) => id,
            Err(e) => {
                debug!(path = ?path, error = %e, "Cannot identify matching file, skipping.");
                continue;
            }
        };

        if !seen.insert(file_id) {
            debug!(file_id = %file_id, path = ?path, "Skipping another link to a matched file.");
            continue;
        }

        if active.contains(&file_id) {
            candidates.push(Candidate {
                path,
                file_id,
                opened: None,
            });
            continue;
        }

        match inspect(&mut file, fingerprint_size, known.get(&file_id)) {
            Ok((size, fingerprint, known_matches)) => candidates.push(Candidate {
                path,
                file_id,
                opened: Some(OpenedFile {
                    file,
                    size,
                    fingerprint,
                    known_matches,
                }),
            }),
            Err(e) => debug!(path = ?path, error = %e, "Cannot read matching file, skipping."),
        }
    }

    Ok(candidates)
}

fn inspect(
    file: &mut File,
    fingerprint_size: usize,
    known: Option<&Option<Fingerprint>>,
) -> io::Result<(u64, Option<Fingerprint>, Option<bool>)> {
    let size = file.metadata()?.len();
    let fingerprint = Fingerprint::from_file(file, fingerprint_size)?;
    let known_matches = match known {
        None => None,
        // Nothing to compare against
        Some(None) => Some(true),
        Some(Some(expected)) => Some(expected.matches(file)?),
    };
    Ok((size, fingerprint, known_matches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::receivers::file::registry::RegistryEntry;
    use crate::receivers::file::watcher::WatchMode;
    use chrono::Utc;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(dir: &TempDir) -> FileReceiverConfig {
        FileReceiverConfig {
            include: vec![format!("{}/*.log", dir.path().display())],
            watch_mode: WatchMode::Poll,
            scan_interval: Duration::from_millis(20),
            poll_backoff: Duration::from_millis(5),
            max_poll_backoff: Duration::from_millis(20),
            registry_path: dir.path().join("registry.json"),
            clean_removed: Some(Duration::from_millis(100)),
            ..Default::default()
        }
    }

    struct Running {
        rx: BoundedReceiver<FileEvent>,
        ready: oneshot::Receiver<()>,
        cancel: CancellationToken,
        handle: JoinHandle<std::result::Result<(), BoxError>>,
    }

    fn start(config: FileReceiverConfig, snapshot: RegistrySnapshot) -> Running {
        let (tx, rx) = bounded(128);
        let cancel = CancellationToken::new();
        let (ready_tx, ready) = oneshot::channel();

        let prospector = Prospector::new(Arc::new(config), &snapshot, tx, cancel.clone())
            .unwrap()
            .with_ready(ready_tx);

        Running {
            rx,
            ready,
            cancel,
            handle: tokio::spawn(prospector.run()),
        }
    }

    impl Running {
        /// Collect events until `n` records were seen
        async fn records(&mut self, n: usize, events: &mut Vec<FileEvent>) -> Vec<String> {
            let mut lines = Vec::new();
            while lines.len() < n {
                let ev = timeout(WAIT, self.rx.next()).await.unwrap().unwrap();
                if let FileEvent::Record(r) = &ev {
                    lines.push(r.line.clone());
                }
                events.push(ev);
            }
            lines
        }

        async fn quiet(&mut self, events: &mut Vec<FileEvent>) {
            while let Ok(Some(ev)) = timeout(Duration::from_millis(150), self.rx.next()).await {
                events.push(ev);
            }
        }

        async fn stop(self) {
            self.cancel.cancel();
            timeout(WAIT, self.handle).await.unwrap().unwrap().unwrap();
        }
    }

    fn append(path: &Path, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn discovered(events: &[FileEvent]) -> Vec<(PathBuf, u64, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                FileEvent::Discovered {
                    path,
                    offset,
                    replace,
                    ..
                } => Some((path.clone(), *offset, *replace)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_discovers_files_and_signals_ready() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("a.log"), "a1\na2\n");
        append(&dir.path().join("b.log"), "b1\n");
        append(&dir.path().join("c.txt"), "ignored\n");

        let mut p = start(test_config(&dir), RegistrySnapshot::new());
        timeout(WAIT, &mut p.ready).await.unwrap().unwrap();

        let mut events = Vec::new();
        let mut lines = p.records(3, &mut events).await;
        lines.sort();
        assert_eq!(lines, vec!["a1", "a2", "b1"]);
        assert_eq!(discovered(&events).len(), 2);

        p.quiet(&mut events).await;
        assert_eq!(discovered(&events).len(), 2, "files are discovered once");
        p.stop().await;
    }

    #[tokio::test]
    async fn test_resumes_from_matching_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first\nsecond\n");
        let file_id = FileId::from_path(&path).unwrap();

        let mut snapshot = RegistrySnapshot::new();
        snapshot.insert(
            file_id,
            RegistryEntry {
                file_id,
                path: path.clone(),
                offset: 6,
                fingerprint: Some(Fingerprint::from_bytes(b"first\n")),
                updated_at: Utc::now(),
            },
        );

        let mut p = start(test_config(&dir), snapshot);
        let mut events = Vec::new();
        assert_eq!(p.records(1, &mut events).await, vec!["second"]);
        assert_eq!(discovered(&events), vec![(path, 6, false)]);
        p.stop().await;
    }

    #[tokio::test]
    async fn test_reused_identity_starts_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "brand new content\n");
        let file_id = FileId::from_path(&path).unwrap();

        let mut snapshot = RegistrySnapshot::new();
        snapshot.insert(
            file_id,
            RegistryEntry {
                file_id,
                path: dir.path().join("old.log"),
                offset: 500,
                fingerprint: Some(Fingerprint::from_bytes(b"something else\n")),
                updated_at: Utc::now(),
            },
        );

        let mut p = start(test_config(&dir), snapshot);
        let mut events = Vec::new();
        assert_eq!(p.records(1, &mut events).await, vec!["brand new content"]);
        assert_eq!(discovered(&events), vec![(path, 0, true)]);
        p.stop().await;
    }

    #[tokio::test]
    async fn test_rename_keeps_harvester() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\n");

        let mut p = start(test_config(&dir), RegistrySnapshot::new());
        let mut events = Vec::new();
        p.records(1, &mut events).await;

        let renamed = dir.path().join("app-1.log");
        std::fs::rename(&path, &renamed).unwrap();
        p.quiet(&mut events).await;
        append(&renamed, "two\n");

        let mut more = Vec::new();
        assert_eq!(p.records(1, &mut more).await, vec!["two"]);
        events.extend(more);
        p.quiet(&mut events).await;

        assert!(events.iter().any(|e| matches!(
            e,
            FileEvent::Renamed { path, .. } if *path == renamed
        )));
        assert_eq!(discovered(&events).len(), 1);
        let records: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, FileEvent::Record(_)))
            .collect();
        assert_eq!(records.len(), 2);
        p.stop().await;
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old\n");

        let config = FileReceiverConfig {
            start_at: StartAt::End,
            ..test_config(&dir)
        };
        let mut p = start(config, RegistrySnapshot::new());
        timeout(WAIT, &mut p.ready).await.unwrap().unwrap();

        append(&path, "new\n");
        let mut events = Vec::new();
        assert_eq!(p.records(1, &mut events).await, vec!["new"]);
        assert_eq!(discovered(&events), vec![(path, 4, false)]);

        // Files created later are read in full
        let late = dir.path().join("late.log");
        append(&late, "late\n");
        assert_eq!(p.records(1, &mut events).await, vec!["late"]);
        p.stop().await;
    }

    #[tokio::test]
    async fn test_overlapping_patterns_harvest_once() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), "only once\n");

        let mut config = test_config(&dir);
        config
            .include
            .push(format!("{}/app.*", dir.path().display()));
        let mut p = start(config, RegistrySnapshot::new());

        let mut events = Vec::new();
        p.records(1, &mut events).await;
        p.quiet(&mut events).await;

        let records = events
            .iter()
            .filter(|e| matches!(e, FileEvent::Record(_)))
            .count();
        assert_eq!(records, 1);
        p.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_removed_file_is_forgotten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "bye\n");
        let file_id = FileId::from_path(&path).unwrap();

        let mut p = start(test_config(&dir), RegistrySnapshot::new());
        let mut events = Vec::new();
        p.records(1, &mut events).await;

        std::fs::remove_file(&path).unwrap();

        let forgotten = timeout(WAIT, async {
            loop {
                match p.rx.next().await {
                    Some(FileEvent::Forget { file_id: id }) => break id,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(forgotten, file_id);
        p.stop().await;
    }

    #[tokio::test]
    async fn test_file_rotated_out_of_patterns_keeps_harvesting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\n");

        let mut p = start(test_config(&dir), RegistrySnapshot::new());
        let mut events = Vec::new();
        p.records(1, &mut events).await;

        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).unwrap();

        // Many scans without a match
        tokio::time::sleep(Duration::from_millis(300)).await;
        append(&rotated, "written after rotation\n");

        assert_eq!(
            p.records(1, &mut events).await,
            vec!["written after rotation"]
        );
        p.stop().await;
    }

    #[tokio::test]
    async fn test_close_renamed_closes_unmatched_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\n");

        let config = FileReceiverConfig {
            close_renamed: Some(Duration::from_millis(50)),
            ..test_config(&dir)
        };
        let mut p = start(config, RegistrySnapshot::new());
        let mut events = Vec::new();
        p.records(1, &mut events).await;

        let moved = dir.path().join("app.old");
        std::fs::rename(&path, &moved).unwrap();
        append(&moved, "written before close\n");

        // Drained up to EOF before closing
        assert_eq!(
            p.records(1, &mut events).await,
            vec!["written before close"]
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        append(&moved, "never read\n");
        p.quiet(&mut events).await;
        assert!(!events.iter().any(|e| matches!(
            e,
            FileEvent::Record(r) if r.line == "never read"
        )));
        p.stop().await;
    }
}
