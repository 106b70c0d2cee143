// SPDX-License-Identifier: Apache-2.0

//! Output sinks. A sink receives ordered batches of records and acknowledges
//! them by returning `Ok`; only then are file offsets advanced.

pub mod blackhole;
pub mod file;
pub mod retry;

use std::future::Future;

use thiserror::Error;

use crate::exporters::blackhole::BlackholeSink;
use crate::exporters::file::FileSink;
use crate::receivers::file::Record;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination of harvested records.
///
/// A batch is acknowledged as a whole. On error the same batch is offered
/// again later, so implementations must tolerate redelivery.
pub trait Sink: Send {
    fn publish(&mut self, records: &[Record]) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn name(&self) -> &'static str;
}

/// Sinks selectable from the command line.
pub enum AnySink {
    Blackhole(BlackholeSink),
    File(FileSink),
}

impl Sink for AnySink {
    async fn publish(&mut self, records: &[Record]) -> Result<(), SinkError> {
        match self {
            AnySink::Blackhole(s) => s.publish(records).await,
            AnySink::File(s) => s.publish(records).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AnySink::Blackhole(s) => s.name(),
            AnySink::File(s) => s.name(),
        }
    }
}
