//! Server-Sent Events framing.
//!
//! The parser buffers raw bytes and only decodes complete lines, so a
//! multi-byte character split across two network chunks survives intact.

/// One dispatched SSE message.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field; `None` means the default `message` kind.
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Message kind with the SSE default applied.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    fn is_blank(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none() && self.retry.is_none()
    }
}

/// Incremental parser; feed chunks as they arrive, collect finished events.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    current: SseEvent,
    saw_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            self.take_line(&line, &mut out);
            start = end + 1;
        }
        self.pending.drain(..start);

        out
    }

    /// Flush a trailing event that was never terminated by a blank line.
    pub fn finish(mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            let mut discarded = Vec::new();
            self.take_line(&line, &mut discarded);
        }
        if self.current.is_blank() {
            None
        } else {
            Some(self.current)
        }
    }

    fn take_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if !self.current.is_blank() {
                out.push(std::mem::take(&mut self.current));
            }
            self.saw_data = false;
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if self.saw_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.saw_data = true;
            }
            // A NUL in the id is ignored per the SSE processing model.
            "id" if !value.contains('\0') => self.current.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.current.retry = Some(ms);
                }
            }
            _ => {}
        }
    }
}
