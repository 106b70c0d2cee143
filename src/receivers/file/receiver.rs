// SPDX-License-Identifier: Apache-2.0

//! Wires the file receiver together.
//!
//! The prospector and its harvesters run on the harvest task set and feed one
//! bounded queue. The spooler drains that queue on the pipeline task set, so
//! it can keep publishing after harvesting stopped.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::info;

use crate::bounded_channel::bounded;
use crate::exporters::Sink;
use crate::receivers::file::config::FileReceiverConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::prospector::Prospector;
use crate::receivers::file::registry::{FileRegistry, RegistrySnapshot};
use crate::topology::spooler::{Spooler, SpoolerConfig};

pub struct FileReceiver {
    config: Arc<FileReceiverConfig>,
    spooler_config: SpoolerConfig,
    snapshots: Option<watch::Sender<Arc<RegistrySnapshot>>>,
}

impl FileReceiver {
    pub fn new(config: FileReceiverConfig, spooler_config: SpoolerConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        if spooler_config.batch.max_size == 0 {
            return Err(Error::Config("batch max_size must be > 0".to_string()));
        }

        Ok(Self {
            config: Arc::new(config),
            spooler_config,
            snapshots: None,
        })
    }

    /// Observe the registry as batches get acknowledged.
    pub fn subscribe(&mut self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        match &self.snapshots {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(Arc::new(RegistrySnapshot::new()));
                self.snapshots = Some(tx);
                rx
            }
        }
    }

    /// Open the registry and spawn the pipeline.
    ///
    /// The returned receiver fires once the first scan completed and all
    /// harvesters it found are running.
    pub fn start<S: Sink + 'static>(
        self,
        sink: S,
        harvest_tasks: &mut JoinSet<std::result::Result<(), BoxError>>,
        harvest_cancel: &CancellationToken,
        pipeline_tasks: &mut JoinSet<std::result::Result<(), BoxError>>,
        pipeline_cancel: &CancellationToken,
    ) -> Result<oneshot::Receiver<()>> {
        info!(
            include = ?self.config.include,
            exclude = ?self.config.exclude,
            start_at = ?self.config.start_at,
            watch_mode = ?self.config.watch_mode,
            registry = ?self.config.registry_path,
            sink = sink.name(),
            "Starting file receiver."
        );

        let registry = FileRegistry::open(&self.config.registry_path, self.config.corrupt_registry)?;
        let snapshot = registry.snapshot();

        let (events_tx, events_rx) = bounded(self.config.queue_size);
        let (ready_tx, ready_rx) = oneshot::channel();

        let prospector = Prospector::new(
            self.config.clone(),
            &snapshot,
            events_tx,
            harvest_cancel.clone(),
        )?
        .with_ready(ready_tx);

        let mut spooler = Spooler::new(self.spooler_config, events_rx, registry, sink);
        if let Some(tx) = self.snapshots {
            tx.send_replace(snapshot);
            spooler = spooler.with_snapshots(tx);
        }

        let cancel = pipeline_cancel.clone();
        pipeline_tasks.spawn(spooler.run(cancel));
        harvest_tasks.spawn(prospector.run());

        Ok(ready_rx)
    }
}
