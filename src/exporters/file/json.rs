// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::receivers::file::Record;

/// One output line of the file sink
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    message: &'a str,
    log: LogInfo<'a>,
}

#[derive(Debug, Serialize)]
struct LogInfo<'a> {
    file: FileInfo<'a>,
    offset: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct FileInfo<'a> {
    path: Cow<'a, str>,
    id: String,
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append the newline terminated JSON encoding of `records` to `out`.
pub fn encode_records(records: &[Record], out: &mut Vec<u8>) -> serde_json::Result<()> {
    for record in records {
        let json = JsonRecord {
            timestamp: timestamp(&record.read_at),
            message: &record.line,
            log: LogInfo {
                file: FileInfo {
                    path: record.source.to_string_lossy(),
                    id: record.file_id.to_key(),
                },
                offset: record.offset,
                truncated: record.truncated,
            },
        };
        serde_json::to_writer(&mut *out, &json)?;
        out.push(b'\n');
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::input::FileId;
    use chrono::TimeZone;
    use std::path::Path;
    use std::sync::Arc;

    #[test]
    fn test_encode_records() {
        let record = Record {
            file_id: FileId::new(7, 42),
            source: Arc::from(Path::new("/var/log/app.log")),
            line: "say \"hi\"".to_string(),
            read_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            offset: 11,
            truncated: false,
        };
        let mut cut = record.clone();
        cut.truncated = true;

        let mut out = Vec::new();
        encode_records(&[record, cut], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["@timestamp"], "2024-05-01T12:00:00.000Z");
        assert_eq!(v["message"], "say \"hi\"");
        assert_eq!(v["log"]["file"]["path"], "/var/log/app.log");
        assert_eq!(v["log"]["file"]["id"], "7:42");
        assert_eq!(v["log"]["offset"], 11);
        assert!(v["log"].get("truncated").is_none());

        let v: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(v["log"]["truncated"], true);
    }
}
