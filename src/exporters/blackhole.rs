// SPDX-License-Identifier: Apache-2.0

use tracing::debug;

use crate::exporters::{Sink, SinkError};
use crate::receivers::file::Record;

/// Acknowledges everything and keeps nothing.
#[derive(Debug, Default)]
pub struct BlackholeSink {
    records: u64,
}

impl BlackholeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records acknowledged so far
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl Sink for BlackholeSink {
    async fn publish(&mut self, records: &[Record]) -> Result<(), SinkError> {
        self.records += records.len() as u64;
        debug!(count = records.len(), total = self.records, "Dropped records.");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "blackhole"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::input::FileId;
    use std::path::Path;
    use std::sync::Arc;

    #[tokio::test]
    async fn acknowledges_everything() {
        let record = Record {
            file_id: FileId::new(1, 2),
            source: Arc::from(Path::new("/var/log/a.log")),
            line: "hello".to_string(),
            read_at: chrono::Utc::now(),
            offset: 6,
            truncated: false,
        };

        let mut sink = BlackholeSink::new();
        sink.publish(&[record.clone(), record]).await.unwrap();
        sink.publish(&[]).await.unwrap();
        assert_eq!(sink.records(), 2);
    }
}
