//! Incremental decoder for `text/event-stream` bodies.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns the data of every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(line_end + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            // Comments and fields other than data (event, id, retry) carry nothing we use.
            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }

        events
    }
}
