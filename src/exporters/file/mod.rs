// SPDX-License-Identifier: Apache-2.0

//! Writes records as JSON lines to a file or to stdout.

mod json;

pub use json::encode_records;

use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::exporters::{Sink, SinkError};
use crate::receivers::file::Record;

/// Where the file sink writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSinkTarget {
    Stdout,
    Path(PathBuf),
}

impl From<&str> for FileSinkTarget {
    fn from(s: &str) -> Self {
        match s {
            "-" => FileSinkTarget::Stdout,
            path => FileSinkTarget::Path(PathBuf::from(path)),
        }
    }
}

pub struct FileSink {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    buf: Vec<u8>,
}

impl FileSink {
    /// Open the target, files are created if missing and appended to.
    pub async fn open(target: &FileSinkTarget) -> Result<Self, SinkError> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match target {
            FileSinkTarget::Stdout => Box::new(tokio::io::stdout()),
            FileSinkTarget::Path(path) => Box::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
        };

        Ok(Self {
            writer,
            buf: Vec::new(),
        })
    }
}

impl Sink for FileSink {
    async fn publish(&mut self, records: &[Record]) -> Result<(), SinkError> {
        self.buf.clear();
        encode_records(records, &mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::input::FileId;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(line: &str, offset: u64) -> Record {
        Record {
            file_id: FileId::new(1, 2),
            source: Arc::from(Path::new("/var/log/a.log")),
            line: line.to_string(),
            read_at: chrono::Utc::now(),
            offset,
            truncated: false,
        }
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!(FileSinkTarget::from("-"), FileSinkTarget::Stdout);
        assert_eq!(
            FileSinkTarget::from("/tmp/out.json"),
            FileSinkTarget::Path(PathBuf::from("/tmp/out.json"))
        );
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let target = FileSinkTarget::Path(path.clone());

        let mut sink = FileSink::open(&target).await.unwrap();
        sink.publish(&[record("one", 4), record("two", 8)])
            .await
            .unwrap();
        drop(sink);

        let mut sink = FileSink::open(&target).await.unwrap();
        sink.publish(&[record("three", 14)]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let messages: Vec<String> = text
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_stdout_sink_publishes() {
        let mut sink = FileSink::open(&FileSinkTarget::Stdout).await.unwrap();
        assert_eq!(sink.name(), "file");
        sink.publish(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_sink_missing_directory() {
        let dir = TempDir::new().unwrap();
        let target = FileSinkTarget::Path(dir.path().join("missing/out.json"));
        assert!(matches!(
            FileSink::open(&target).await,
            Err(SinkError::Io(_))
        ));
    }
}
