// SPDX-License-Identifier: Apache-2.0

//! Tails a single file.
//!
//! A harvester owns the open file handle for its whole life. It reads chunks
//! after its current offset, splits them into lines and forwards one record
//! per complete line. Reaching EOF does not stop it: it waits for more data
//! until it is stopped, its file is deleted, or the prospector closes it.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::FileReceiverConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileId, Fingerprint, LineSplitter, is_unlinked};
use crate::receivers::file::record::{FileEvent, Record};
use crate::receivers::file::watcher::{AnyWaiter, DataWaiter, WaiterConfig, create_waiter};

const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const MAX_TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub fingerprint_size: usize,
    pub read_buffer_size: usize,
    pub max_line_size: usize,
    pub waiter: WaiterConfig,
}

impl From<&FileReceiverConfig> for HarvesterConfig {
    fn from(config: &FileReceiverConfig) -> Self {
        Self {
            fingerprint_size: config.fingerprint_size,
            read_buffer_size: config.read_buffer_size,
            max_line_size: config.max_line_size,
            waiter: WaiterConfig {
                mode: config.watch_mode,
                poll_backoff: config.poll_backoff,
                max_poll_backoff: config.max_poll_backoff,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HarvesterState {
    Opening,
    Tailing,
    Truncated,
    Closing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop signal received
    Stopped,
    /// Closed by the prospector after reaching EOF
    Closed,
    /// The file was deleted and fully read
    Removed,
    /// The spooler is gone
    ChannelClosed,
    /// Unrecoverable read error
    Error(String),
}

#[derive(Debug)]
pub struct HarvesterExit {
    pub file_id: FileId,
    pub path: PathBuf,
    /// End of the last line that was forwarded or skipped. Restarting from
    /// here neither skips nor repeats a line.
    pub offset: u64,
    /// Fingerprint of the file content as last seen by the harvester
    pub fingerprint: Option<Fingerprint>,
    pub reason: ExitReason,
}

pub struct Harvester {
    file_id: FileId,
    file: tokio::fs::File,
    source: Arc<Path>,
    path_rx: watch::Receiver<PathBuf>,
    read_offset: u64,
    consumed_offset: u64,
    fingerprint: Option<Fingerprint>,
    splitter: LineSplitter,
    events: BoundedSender<FileEvent>,
    stop: CancellationToken,
    close: CancellationToken,
    waiter: Option<AnyWaiter>,
    config: Arc<HarvesterConfig>,
    state: HarvesterState,
}

impl Harvester {
    /// Create a harvester for an already opened file, starting at `offset`.
    pub fn new(
        file_id: FileId,
        file: std::fs::File,
        path: PathBuf,
        offset: u64,
        config: Arc<HarvesterConfig>,
        events: BoundedSender<FileEvent>,
    ) -> Self {
        let source: Arc<Path> = Arc::from(path.as_path());
        let (_path_tx, path_rx) = watch::channel(path);

        Self {
            file_id,
            file: tokio::fs::File::from_std(file),
            source,
            path_rx,
            read_offset: offset,
            consumed_offset: offset,
            fingerprint: None,
            splitter: LineSplitter::new(config.max_line_size),
            events,
            stop: CancellationToken::new(),
            close: CancellationToken::new(),
            waiter: None,
            config,
            state: HarvesterState::Opening,
        }
    }

    /// Receive path changes of the file after renames.
    pub fn with_path_updates(mut self, path_rx: watch::Receiver<PathBuf>) -> Self {
        self.source = Arc::from(path_rx.borrow().as_path());
        self.path_rx = path_rx;
        self
    }

    /// Stop immediately, finishing only the current read.
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Read to EOF, then stop.
    pub fn with_close(mut self, close: CancellationToken) -> Self {
        self.close = close;
        self
    }

    /// Fingerprint taken when the file was discovered.
    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_waiter(mut self, waiter: AnyWaiter) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub async fn run(mut self) -> HarvesterExit {
        debug!(
            file_id = %self.file_id,
            path = ?self.source,
            offset = self.read_offset,
            "Starting harvester."
        );

        let reason = match self.harvest().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(
                    file_id = %self.file_id,
                    path = ?self.source,
                    state = ?self.state,
                    error = %e,
                    "Failed to read file, closing it."
                );
                ExitReason::Error(e.to_string())
            }
        };
        self.state = HarvesterState::Stopped;

        debug!(
            file_id = %self.file_id,
            path = ?self.source,
            offset = self.consumed_offset,
            reason = ?reason,
            "Harvester stopped."
        );

        HarvesterExit {
            file_id: self.file_id,
            path: self.source.to_path_buf(),
            offset: self.consumed_offset,
            fingerprint: self.fingerprint.take(),
            reason,
        }
    }

    async fn harvest(&mut self) -> Result<ExitReason> {
        let mut waiter = match self.waiter.take() {
            Some(waiter) => waiter,
            None => create_waiter(&self.config.waiter, &self.source)
                .map_err(|e| Error::Watch(e.to_string()))?,
        };

        let size = self.file.metadata().await?.len();
        if self.read_offset > size {
            if let Err(reason) = self.restart_truncated(size).await? {
                return Ok(reason);
            }
        }
        self.file.seek(SeekFrom::Start(self.read_offset)).await?;
        self.state = HarvesterState::Tailing;

        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut lines = Vec::new();
        let mut retry_backoff = TRANSIENT_RETRY_BACKOFF;

        loop {
            if self.stop.is_cancelled() {
                return Ok(ExitReason::Stopped);
            }
            self.refresh_path();

            let n = match self.file.read(&mut buf).await {
                Ok(n) => n,
                Err(e) if is_transient(&e) => {
                    debug!(file_id = %self.file_id, error = %e, "Transient read error, retrying.");
                    tokio::time::sleep(retry_backoff).await;
                    retry_backoff = std::cmp::min(retry_backoff * 2, MAX_TRANSIENT_RETRY_BACKOFF);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            retry_backoff = TRANSIENT_RETRY_BACKOFF;

            if n > 0 {
                let chunk_start = self.read_offset;
                self.read_offset += n as u64;
                self.splitter.push(&buf[..n], chunk_start, &mut lines);

                for line in lines.drain(..) {
                    if !line.is_empty() {
                        let record = Record {
                            file_id: self.file_id,
                            source: self.source.clone(),
                            line: line.text(),
                            read_at: Utc::now(),
                            offset: line.end_offset,
                            truncated: line.truncated,
                        };
                        let event = FileEvent::Record(record);
                        if let Err(reason) = forward(&self.events, &self.stop, event).await {
                            return Ok(reason);
                        }
                    }
                    self.consumed_offset = line.end_offset;
                }

                waiter.data_seen();
                continue;
            }

            // EOF
            let metadata = self.file.metadata().await?;
            if metadata.len() < self.read_offset {
                if let Err(reason) = self.restart_truncated(metadata.len()).await? {
                    return Ok(reason);
                }
                self.state = HarvesterState::Tailing;
                continue;
            }

            if is_unlinked(&metadata, &self.source) {
                self.state = HarvesterState::Closing;
                debug!(file_id = %self.file_id, path = ?self.source, "File was removed.");
                return Ok(ExitReason::Removed);
            }

            if let Err(reason) = self.refresh_fingerprint().await? {
                return Ok(reason);
            }

            if self.close.is_cancelled() {
                self.state = HarvesterState::Closing;
                return Ok(ExitReason::Closed);
            }

            select! {
                biased;
                _ = self.stop.cancelled() => return Ok(ExitReason::Stopped),
                // Read once more before closing
                _ = self.close.cancelled() => {},
                _ = waiter.wait_for_more_data(self.config.waiter.max_poll_backoff) => {},
            }
        }
    }

    /// Rewind to the start after the file shrank below the read offset.
    async fn restart_truncated(
        &mut self,
        size: u64,
    ) -> Result<std::result::Result<(), ExitReason>> {
        self.state = HarvesterState::Truncated;
        warn!(
            file_id = %self.file_id,
            path = ?self.source,
            size,
            offset = self.read_offset,
            "File was truncated, reading from the beginning."
        );

        self.splitter.reset();
        self.read_offset = 0;
        self.consumed_offset = 0;
        self.fingerprint = None;
        self.file.seek(SeekFrom::Start(0)).await?;

        let event = FileEvent::Truncated {
            file_id: self.file_id,
            path: self.source.to_path_buf(),
        };
        Ok(forward(&self.events, &self.stop, event).await)
    }

    /// Fingerprint the file again while it is shorter than the fingerprint size
    /// and has grown past the bytes covered so far. A file discovered empty
    /// only gets a fingerprint here.
    async fn refresh_fingerprint(&mut self) -> Result<std::result::Result<(), ExitReason>> {
        let size = self.config.fingerprint_size as u64;
        let covered = self.fingerprint.as_ref().map_or(0, |fp| fp.len());
        if covered >= size || self.read_offset <= covered {
            return Ok(Ok(()));
        }

        let mut prefix = Vec::with_capacity(size.min(self.read_offset) as usize);
        self.file.seek(SeekFrom::Start(0)).await?;
        (&mut self.file)
            .take(size.min(self.read_offset))
            .read_to_end(&mut prefix)
            .await?;
        self.file.seek(SeekFrom::Start(self.read_offset)).await?;

        if (prefix.len() as u64) <= covered {
            return Ok(Ok(()));
        }

        let fingerprint = Fingerprint::from_bytes(&prefix);
        debug!(
            file_id = %self.file_id,
            len = fingerprint.len(),
            "Updated file fingerprint."
        );
        self.fingerprint = Some(fingerprint.clone());

        let event = FileEvent::Fingerprinted {
            file_id: self.file_id,
            fingerprint,
        };
        Ok(forward(&self.events, &self.stop, event).await)
    }

    fn refresh_path(&mut self) {
        if self.path_rx.has_changed().unwrap_or(false) {
            let path = self.path_rx.borrow_and_update().clone();
            debug!(
                file_id = %self.file_id,
                from = ?self.source,
                to = ?path,
                "Harvested file was renamed."
            );
            self.source = Arc::from(path.as_path());
        }
    }
}

/// Hand an event to the spooler, waiting for capacity unless stopped.
async fn forward(
    events: &BoundedSender<FileEvent>,
    stop: &CancellationToken,
    event: FileEvent,
) -> std::result::Result<(), ExitReason> {
    select! {
        biased;
        r = events.send(event) => r.map_err(|_| ExitReason::ChannelClosed),
        _ = stop.cancelled() => Err(ExitReason::Stopped),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
