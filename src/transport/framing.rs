// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Byte framing shared by the transports.
//!
//! - stdio pipes: newline-delimited or `Content-Length`-headed frames
//! - HTTP/SSE bodies: `text/event-stream` event decoding

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::error::TransportError;
use crate::config::StdioFraming;

/// Upper bound for a single `Content-Length` body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Wrap a frame body for writing to a pipe.
pub fn encode_frame(framing: StdioFraming, body: &[u8]) -> Vec<u8> {
    match framing {
        StdioFraming::Newline => {
            let mut out = Vec::with_capacity(body.len() + 1);
            out.extend_from_slice(body);
            out.push(b'\n');
            out
        }
        StdioFraming::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let mut out = Vec::with_capacity(header.len() + body.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(body);
            out
        }
    }
}

/// Read one frame. Returns `Ok(None)` on EOF.
pub async fn read_frame<R>(
    reader: &mut R,
    framing: StdioFraming,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        StdioFraming::Newline => read_line_frame(reader).await,
        StdioFraming::ContentLength => read_content_length_frame(reader).await,
    }
}

async fn read_line_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        // Blank keep-alive lines carry no frame.
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
            line.pop();
        }
        return Ok(Some(line));
    }
}

async fn read_content_length_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut header_line = String::new();
    let mut saw_header = false;

    loop {
        header_line.clear();
        let n = reader.read_line(&mut header_line).await?;
        if n == 0 {
            if saw_header {
                return Err(TransportError::Framing("EOF inside frame headers".into()));
            }
            return Ok(None);
        }
        let trimmed = header_line.trim();
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
        // Other headers (Content-Type, ...) are ignored.
    }

    let len = content_length
        .ok_or_else(|| TransportError::Framing("missing Content-Length header".into()))?;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Framing(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Whether a `Content-Type` header names an event stream.
pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event carries a protocol frame.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split anywhere, including inside a line or a UTF-8
/// sequence; events are dispatched on blank lines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let newline = start + pos;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = newline + 1;
        }

        self.buffer.drain(..start);
        events
    }

    /// Flush a trailing unterminated event at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.process_line(&line);
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id/retry are not used by the bridge.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}
