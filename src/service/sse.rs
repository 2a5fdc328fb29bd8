//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks arrive at arbitrary byte boundaries: a line, or a multi-byte
//! UTF-8 sequence inside a line, may be split across two reads. The decoder
//! buffers raw bytes and only decodes complete lines. `\n` never occurs inside
//! a multi-byte sequence, so a complete line is always complete UTF-8; a line
//! that still fails to decode ends the stream as an interruption.
//!
//! Framing follows the event-stream format: `field: value` lines, events
//! dispatched on a blank line, `:` comment lines ignored, multiple `data:`
//! lines of one event joined with `\n`.

use crate::error::ExtractError;

/// Payload that terminates an OpenAI-style completion stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if the server sent one.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_MARKER
    }

    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some("error")
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every event completed by it.
    ///
    /// # Errors
    /// [`ExtractError::StreamInterrupted`] when a complete line is not UTF-8.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ExtractError> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buf.drain(..=pos).collect();
            raw.pop();
            let line = decode_line(raw)?;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flush at end of body: a trailing unterminated line and any event not
    /// yet followed by a blank line.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, ExtractError> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let line = decode_line(std::mem::take(&mut self.buf))?;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            // id / retry carry nothing a one-shot completion needs
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        self.data.take().map(|data| SseEvent { event, data })
    }
}

/// Decode one line without its `\n`, dropping a trailing `\r`.
fn decode_line(raw: Vec<u8>) -> Result<String, ExtractError> {
    let mut line = String::from_utf8(raw).map_err(|_| ExtractError::StreamInterrupted {
        detail: "stream carried invalid UTF-8".into(),
    })?;
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
