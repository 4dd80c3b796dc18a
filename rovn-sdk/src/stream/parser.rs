//! Server-Sent Events line parser.
//!
//! Pure, incremental parsing of the `text/event-stream` format: feed raw body
//! chunks in, get completed blocks out. Partial lines are kept across chunks,
//! so a block split at any byte boundary parses the same as an unsplit one.
//!
//! Framing rules:
//! - lines end with `\n` or `\r\n`
//! - `field: value` and `field:value` are equivalent (one leading space is stripped)
//! - lines starting with `:` are comments
//! - several `data:` lines in one block are joined with `\n`
//! - a blank line completes the block

/// One completed block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the block's `id:` line, if any.
    pub id: Option<String>,
    /// Value of the block's `event:` line (empty if absent).
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseFrame {
    /// Whether the frame carries an event for the handler: a non-empty type
    /// and non-empty data.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        !self.event.is_empty() && !self.data.is_empty()
    }
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes after the last newline seen.
    partial: Vec<u8>,
    id: Option<String>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body; returns every block it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            let line = if self.partial.is_empty() {
                decode_line(head)
            } else {
                self.partial.extend_from_slice(head);
                let line = decode_line(&self.partial);
                self.partial.clear();
                line
            };

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        self.partial.extend_from_slice(rest);
        frames
    }

    /// Discard any partially received block (used when a connection drops).
    pub fn reset(&mut self) {
        self.partial.clear();
        self.clear_block();
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.complete_block();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => {
                // An id containing NUL is ignored.
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            // "retry" and unknown fields carry nothing we act on.
            _ => {}
        }
        None
    }

    fn complete_block(&mut self) -> Option<SseFrame> {
        if self.id.is_none() && self.event.is_empty() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            id: self.id.take(),
            event: std::mem::take(&mut self.event),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }

    fn clear_block(&mut self) {
        self.id = None;
        self.event.clear();
        self.data.clear();
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
