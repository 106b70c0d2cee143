// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::exporters::AnySink;
use crate::init::args::AgentRun;
use crate::init::batch::build_spooler_config;
use crate::init::wait;
use crate::receivers::file::FileReceiver;
use crate::topology::spooler::SpoolerConfig;

// Harvesters only finish their current read once cancelled
const HARVEST_STOP_TIMEOUT: Duration = Duration::from_secs(2);

// Slack on top of the publishing deadline for the final checkpoint
const PIPELINE_STOP_GRACE: Duration = Duration::from_secs(1);

pub struct Agent {
    config: Box<AgentRun>,
    sink: Option<AnySink>,
}

impl Agent {
    pub fn new(config: Box<AgentRun>) -> Self {
        Self { config, sink: None }
    }

    /// Use this sink instead of the one selected by the arguments.
    pub fn with_sink(mut self, sink: AnySink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Maximum time the agent needs to stop once cancelled
    pub fn shutdown_timeout(&self) -> Duration {
        let spooler: SpoolerConfig = build_spooler_config(&self.config.batch);
        HARVEST_STOP_TIMEOUT + spooler.shutdown_timeout + PIPELINE_STOP_GRACE
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        info!("Starting tailbeat.");

        let spooler_config = build_spooler_config(&config.batch);
        let pipeline_timeout = spooler_config.shutdown_timeout + PIPELINE_STOP_GRACE;
        let receiver = FileReceiver::new(config.file_receiver.build_config(), spooler_config)?;

        let sink = match self.sink {
            Some(sink) => sink,
            None => config.sink.build().await?,
        };

        let mut harvest_task_set = JoinSet::new();
        let mut pipeline_task_set = JoinSet::new();

        let harvest_cancel = CancellationToken::new();
        let pipeline_cancel = CancellationToken::new();

        let mut ready = receiver.start(
            sink,
            &mut harvest_task_set,
            &harvest_cancel,
            &mut pipeline_task_set,
            &pipeline_cancel,
        )?;
        let mut waiting_ready = true;

        let mut result = Ok(());
        loop {
            select! {
                _ = agent_cancel.cancelled() => {
                    debug!("Agent cancellation signaled.");
                    break;
                },
                r = &mut ready, if waiting_ready => {
                    waiting_ready = false;
                    if r.is_ok() {
                        info!("tailbeat is running! Hit CTRL-C to stop it.");
                    }
                },
                e = wait::wait_for_any_task(&mut harvest_task_set) => {
                    match e {
                        Ok(()) => warn!("Unexpected early exit of file receiver."),
                        Err(e) => result = Err(e),
                    }
                    break;
                },
                e = wait::wait_for_any_task(&mut pipeline_task_set) => {
                    match e {
                        Ok(()) => warn!("Unexpected early exit of publisher."),
                        Err(e) => result = Err(e),
                    }
                    break;
                },
            }
        }

        // Step one, stop harvesting. Lines already read stay queued.
        harvest_cancel.cancel();
        let res = wait::wait_for_tasks_with_timeout(&mut harvest_task_set, HARVEST_STOP_TIMEOUT)
            .await;
        if let Err(e) = res {
            warn!(error = %e, "Harvesting did not stop cleanly.");
            if result.is_ok() {
                result = Err(format!("failed waiting for harvesters to exit: {}", e).into());
            }
        }

        // Step two, publish what is queued within the shutdown timeout and
        // write the final checkpoint.
        pipeline_cancel.cancel();
        let res = wait::wait_for_tasks_with_timeout(&mut pipeline_task_set, pipeline_timeout).await;
        if let Err(e) = res {
            if result.is_ok() {
                result = Err(format!("failed waiting for publisher to exit: {}", e).into());
            }
        }

        if result.is_ok() {
            info!("tailbeat stopped.");
        }
        result
    }
}
