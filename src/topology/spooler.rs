// SPDX-License-Identifier: Apache-2.0

//! The spooler owns the file registry. It batches events from the harvesters,
//! publishes the records and only after the sink acknowledged a batch applies
//! the registry changes that batch carries.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::exporters::Sink;
use crate::exporters::retry::{Backoff, RetryConfig};
use crate::receivers::file::error::Result;
use crate::receivers::file::{FileEvent, FileRegistry, Record, RegistrySnapshot};
use crate::topology::batch::{BatchConfig, RecordBatch};

// Stand-in deadline while nothing is pending
const IDLE_FLUSH: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct SpoolerConfig {
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    /// Interval between registry checkpoints
    pub checkpoint_interval: Duration,
    /// How long checkpoints may keep failing before the spooler gives up
    pub max_checkpoint_failure_duration: Duration,
    /// How long in-flight publishing may continue once shutdown started
    pub shutdown_timeout: Duration,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            checkpoint_interval: Duration::from_secs(1),
            max_checkpoint_failure_duration: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Spooler<S: Sink> {
    config: SpoolerConfig,
    events: BoundedReceiver<FileEvent>,
    registry: FileRegistry,
    sink: S,
    batch: RecordBatch,
    checkpoint_first_failure: Option<Instant>,
    /// Publishing deadline, set once shutdown started
    stop_at: Option<Instant>,
    /// A batch was dropped, nothing after it may be acknowledged
    abandoned: bool,
    snapshots: Option<watch::Sender<Arc<RegistrySnapshot>>>,
}

impl<S: Sink> Spooler<S> {
    pub fn new(
        config: SpoolerConfig,
        events: BoundedReceiver<FileEvent>,
        registry: FileRegistry,
        sink: S,
    ) -> Self {
        let batch = RecordBatch::new(&config.batch);
        Self {
            config,
            events,
            registry,
            sink,
            batch,
            checkpoint_first_failure: None,
            stop_at: None,
            abandoned: false,
            snapshots: None,
        }
    }

    /// Publish a registry snapshot after every applied batch.
    pub fn with_snapshots(mut self, tx: watch::Sender<Arc<RegistrySnapshot>>) -> Self {
        self.snapshots = Some(tx);
        self
    }

    /// Runs until cancelled or until every producer is gone, then drains the
    /// queue, publishes what is left within the shutdown timeout and writes a
    /// final checkpoint.
    pub async fn run(mut self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        info!(sink = self.sink.name(), "Spooler started.");

        let mut checkpoint = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flush_at = self
                .batch
                .deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_FLUSH);

            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Spooler received shutdown signal.");
                    break;
                }

                _ = sleep_until(flush_at), if self.batch.has_records() => {
                    self.flush(&cancel).await;
                }

                _ = checkpoint.tick() => {
                    if let Err(e) = self.maybe_checkpoint() {
                        error!(error = %e, "Checkpoint failures persisted beyond threshold, exiting.");
                        return Err(e.into());
                    }
                }

                event = self.events.next() => match event {
                    Some(event) => self.offer(event, &cancel).await,
                    None => {
                        debug!("All event producers are gone.");
                        break;
                    }
                }
            }
        }

        self.stop_at
            .get_or_insert_with(|| Instant::now() + self.config.shutdown_timeout);

        let mut drained = 0;
        while let Some(event) = self.events.try_recv() {
            drained += 1;
            self.offer(event, &cancel).await;
        }
        if !self.batch.is_empty() {
            self.flush(&cancel).await;
        }
        if drained > 0 {
            debug!(events = drained, "Drained pending events.");
        }

        match self.registry.persist() {
            Ok(()) => info!(files = self.registry.len(), "Final checkpoint completed."),
            Err(e) => warn!(error = %e, "Failed to write final checkpoint."),
        }

        Ok(())
    }

    async fn offer(&mut self, event: FileEvent, cancel: &CancellationToken) {
        self.batch.offer(event);
        // Registry ops without records have nothing to wait for
        if self.batch.is_full() || !self.batch.has_records() {
            self.flush(cancel).await;
        }
    }

    async fn flush(&mut self, cancel: &CancellationToken) {
        let batch = self.batch.take();

        if self.abandoned {
            debug!(
                records = batch.records.len(),
                "Dropping batch after an earlier batch was abandoned."
            );
            return;
        }

        if !batch.records.is_empty() {
            if !self.publish(&batch.records, cancel).await {
                warn!(
                    records = batch.records.len(),
                    "Shutdown timeout reached, abandoning unpublished records. They will be read again on restart."
                );
                self.abandoned = true;
                return;
            }
            debug!(records = batch.records.len(), "Published batch.");
        }

        batch.apply_to(&mut self.registry);
        if let Some(tx) = &self.snapshots {
            tx.send_replace(self.registry.snapshot());
        }
    }

    /// Publish with retries until acknowledged. Returns false only when the
    /// shutdown deadline passed first.
    async fn publish(&mut self, records: &[Record], cancel: &CancellationToken) -> bool {
        let mut backoff = Backoff::new(self.config.retry.clone());
        let shutdown_timeout = self.config.shutdown_timeout;

        loop {
            let result = {
                let publish = self.sink.publish(records);
                tokio::pin!(publish);

                loop {
                    match self.stop_at {
                        Some(stop_at) => break timeout_at(stop_at, &mut publish).await.ok(),
                        None => select! {
                            biased;

                            result = &mut publish => break Some(result),
                            _ = cancel.cancelled() => {
                                self.stop_at = Some(Instant::now() + shutdown_timeout);
                            }
                        },
                    }
                }
            };

            let err = match result {
                Some(Ok(())) => return true,
                Some(Err(e)) => e,
                None => return false,
            };

            let delay = backoff.next_delay();
            info!(
                sink = self.sink.name(),
                error = %err,
                attempt = backoff.attempts(),
                delay = ?delay,
                "Publishing failed, will retry again after delay."
            );

            match self.stop_at {
                Some(stop_at) => {
                    if Instant::now() + delay >= stop_at {
                        return false;
                    }
                    sleep(delay).await;
                }
                None => select! {
                    biased;

                    _ = cancel.cancelled() => {
                        self.stop_at = Some(Instant::now() + shutdown_timeout);
                    }
                    _ = sleep(delay) => {}
                },
            }
        }
    }

    /// Persist the registry, tolerating failures up to the configured
    /// duration.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.registry.persist() {
            Ok(()) => {
                if self.checkpoint_first_failure.take().is_some() {
                    info!("Checkpoint succeeded after previous failures.");
                }
                Ok(())
            }
            Err(e) => {
                let first_failure = *self
                    .checkpoint_first_failure
                    .get_or_insert_with(Instant::now);
                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.config.max_checkpoint_failure_duration {
                    Err(e)
                } else {
                    warn!(
                        error = %e,
                        failing_for = ?failure_duration,
                        "Checkpoint failed."
                    );
                    Ok(())
                }
            }
        }
    }
}
