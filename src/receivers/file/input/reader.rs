// SPDX-License-Identifier: Apache-2.0

/// A complete line cut out of the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without the terminator (and without a trailing `\r`)
    pub bytes: Vec<u8>,
    /// Byte position right after the `\n` that ended this line
    pub end_offset: u64,
    /// Content beyond `max_line_size` was discarded
    pub truncated: bool,
}

impl Line {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The line as text, invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Splits a stream of chunks into newline-terminated lines.
///
/// Bytes after the last newline are buffered until a later chunk completes the
/// line. At most `max_line_size` bytes of a line are kept.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_line_size: usize,
    truncated: bool,
}

impl LineSplitter {
    pub fn new(max_line_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_size,
            truncated: false,
        }
    }

    /// Feed a chunk that started at byte position `chunk_start`. Every line
    /// completed by this chunk is appended to `out`, empty ones included.
    pub fn push(&mut self, chunk: &[u8], chunk_start: u64, out: &mut Vec<Line>) {
        let mut pos = 0;
        while pos < chunk.len() {
            match chunk[pos..].iter().position(|b| *b == b'\n') {
                Some(nl) => {
                    self.append(&chunk[pos..pos + nl]);
                    let end_offset = chunk_start + (pos + nl + 1) as u64;
                    out.push(self.take_line(end_offset));
                    pos += nl + 1;
                }
                None => {
                    self.append(&chunk[pos..]);
                    break;
                }
            }
        }
    }

    /// Drop the partial line, used after truncation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.truncated = false;
    }

    /// Number of bytes held for an incomplete line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn append(&mut self, bytes: &[u8]) {
        let room = self.max_line_size.saturating_sub(self.buf.len());
        let take = room.min(bytes.len());
        self.buf.extend_from_slice(&bytes[..take]);
        if bytes.len() > take {
            self.truncated = true;
        }
    }

    fn take_line(&mut self, end_offset: u64) -> Line {
        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let truncated = std::mem::replace(&mut self.truncated, false);
        Line {
            bytes,
            end_offset,
            truncated,
        }
    }
}
