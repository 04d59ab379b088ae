//! Incremental `text/event-stream` decoder
//!
//! Only `data` fields matter for telemetry. Each dispatched event yields
//! its data lines joined with `\n`. Comments and other fields are skipped,
//! and an event still open when the body ends is dropped.

/// Decodes server-sent events from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    skip_lf: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buffer.len() {
            let byte = self.buffer[i];

            // CRLF split across two chunks
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    start = i + 1;
                    i += 1;
                    continue;
                }
            }

            if byte == b'\n' || byte == b'\r' {
                let line = String::from_utf8_lossy(&self.buffer[start..i]).into_owned();
                self.process_line(&line, &mut events);
                self.skip_lf = byte == b'\r';
                start = i + 1;
            }
            i += 1;
        }

        self.buffer.drain(..start);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        }
    }
}
