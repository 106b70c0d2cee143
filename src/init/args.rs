// SPDX-License-Identifier: Apache-2.0

use clap::Args;

use crate::init::batch::BatchArgs;
use crate::init::file_receiver::FileReceiverArgs;
use crate::init::sink::SinkArgs;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    #[command(flatten)]
    pub file_receiver: FileReceiverArgs,

    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(flatten)]
    pub sink: SinkArgs,
}
