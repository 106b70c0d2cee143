// SPDX-License-Identifier: Apache-2.0

use crate::exporters::retry::RetryConfig;
use crate::topology::batch::BatchConfig;
use crate::topology::spooler::SpoolerConfig;
use clap::Args;

// Batch and publishing settings
#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Maximum number of records published in one batch
    #[arg(long, env = "TAILBEAT_BATCH_MAX_SIZE", default_value = "2048")]
    pub batch_max_size: usize,

    /// Time after which a partial batch is published
    #[arg(long, env = "TAILBEAT_BATCH_TIMEOUT", default_value = "200ms")]
    pub batch_timeout: humantime::Duration,

    /// Initial backoff after a failed publish
    #[arg(long, env = "TAILBEAT_RETRY_INITIAL_BACKOFF", default_value = "1s")]
    pub retry_initial_backoff: humantime::Duration,

    /// Maximum backoff between publish attempts
    #[arg(long, env = "TAILBEAT_RETRY_MAX_BACKOFF", default_value = "30s")]
    pub retry_max_backoff: humantime::Duration,

    /// Interval between registry checkpoints
    #[arg(long, env = "TAILBEAT_CHECKPOINT_INTERVAL", default_value = "1s")]
    pub checkpoint_interval: humantime::Duration,

    /// Maximum duration of consecutive checkpoint failures before exiting
    #[arg(
        long,
        env = "TAILBEAT_MAX_CHECKPOINT_FAILURE_DURATION",
        default_value = "60s"
    )]
    pub max_checkpoint_failure_duration: humantime::Duration,

    /// How long unacknowledged batches may still be published on shutdown
    #[arg(long, env = "TAILBEAT_SHUTDOWN_TIMEOUT", default_value = "5s")]
    pub shutdown_timeout: humantime::Duration,
}

pub fn build_spooler_config(config: &BatchArgs) -> SpoolerConfig {
    SpoolerConfig {
        batch: BatchConfig {
            max_size: config.batch_max_size,
            timeout: config.batch_timeout.into(),
        },
        retry: RetryConfig {
            initial_backoff: config.retry_initial_backoff.into(),
            max_backoff: config.retry_max_backoff.into(),
        },
        checkpoint_interval: config.checkpoint_interval.into(),
        max_checkpoint_failure_duration: config.max_checkpoint_failure_duration.into(),
        shutdown_timeout: config.shutdown_timeout.into(),
    }
}
