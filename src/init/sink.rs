// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};

use crate::exporters::file::{FileSink, FileSinkTarget};
use crate::exporters::{AnySink, SinkError, blackhole::BlackholeSink};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum SinkType {
    /// Acknowledge and discard every record
    Blackhole,
    /// Write JSON lines to a file or stdout
    #[default]
    File,
}

#[derive(Debug, Clone, Args)]
pub struct SinkArgs {
    /// Output sink
    #[arg(value_enum, long, env = "TAILBEAT_SINK", default_value = "file")]
    pub sink: SinkType,

    /// Output path of the file sink, "-" writes to stdout
    #[arg(long, env = "TAILBEAT_SINK_FILE_PATH", default_value = "-")]
    pub sink_file_path: String,
}

impl SinkArgs {
    pub async fn build(&self) -> Result<AnySink, SinkError> {
        match self.sink {
            SinkType::Blackhole => Ok(AnySink::Blackhole(BlackholeSink::new())),
            SinkType::File => {
                let target = FileSinkTarget::from(self.sink_file_path.as_str());
                Ok(AnySink::File(FileSink::open(&target).await?))
            }
        }
    }
}
