//! Newline framing over chunked byte streams

use crate::mcp::error::McpError;

/// Default bound for a single inbound line
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Accumulates carrier chunks and yields complete lines.
///
/// A partial line stays buffered until its newline arrives. A line that
/// grows past `max_line_bytes` is rejected rather than truncated.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    max_line_bytes: usize,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes,
        }
    }

    /// Append a chunk and drain every complete line.
    ///
    /// Lines are trimmed of a trailing `\r`; blank lines are skipped. Only the
    /// new bytes are searched, so a long line costs linear time overall.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, McpError> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut line_start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let newline = search_from + offset;
            let mut line = &self.buffer[line_start..newline];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.len() > self.max_line_bytes {
                return Err(self.overflow());
            }
            let text = String::from_utf8_lossy(line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
            line_start = newline + 1;
            search_from = line_start;
        }

        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line_bytes {
            return Err(self.overflow());
        }

        Ok(lines)
    }

    fn overflow(&mut self) -> McpError {
        self.buffer.clear();
        self.scanned = 0;
        McpError::FrameTooLarge {
            limit: self.max_line_bytes,
        }
    }

    /// Take the unterminated remainder if it already parses as one JSON document
    pub fn take_complete_remainder(&mut self) -> Option<String> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(&self.buffer).ok()?;
        let text = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        self.scanned = 0;
        Some(text)
    }

    /// Bytes held without a terminating newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}
