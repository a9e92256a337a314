//! Incremental decoder for log bodies.
//!
//! Turns raw chunks into text and in-band marker frames. Multi-byte UTF-8
//! sequences split across chunks are carried over; a trailing partial line
//! that could still turn into a marker is held back until more bytes arrive.

use crate::protocol::{could_become_marker, parse_marker_line, Marker};

/// Decoded piece of a log body, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Status(u16),
    NotYetAvailable,
}

impl From<Marker> for Frame {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Status(code) => Frame::Status(code),
            Marker::NotYetAvailable => Frame::NotYetAvailable,
        }
    }
}

#[derive(Debug)]
pub struct StreamDecoder {
    /// Bytes of an incomplete UTF-8 sequence
    carry: Vec<u8>,
    /// Possible marker prefix, always starting at a line boundary
    held: String,
    at_line_start: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            held: String::new(),
            at_line_start: true,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let decoded = self.decode_utf8(chunk);
        let mut text = std::mem::take(&mut self.held);
        text.push_str(&decoded);
        self.scan(&text)
    }

    /// Flush everything still buffered at end of body
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut text = std::mem::take(&mut self.held);
        if !self.carry.is_empty() {
            text.push_str(&String::from_utf8_lossy(&self.carry));
            self.carry.clear();
        }
        if text.is_empty() {
            return Vec::new();
        }
        if self.at_line_start {
            if let Some(marker) = parse_marker_line(&text) {
                return vec![marker.into()];
            }
        }
        self.at_line_start = text.ends_with('\n');
        vec![Frame::Text(text)]
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn scan(&mut self, text: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut out = String::new();
        let mut rest = text;

        while !rest.is_empty() {
            let (line, remainder, complete) = match rest.find('\n') {
                Some(i) => (&rest[..i], &rest[i + 1..], true),
                None => (rest, "", false),
            };

            if self.at_line_start && complete {
                if let Some(marker) = parse_marker_line(line) {
                    if !out.is_empty() {
                        frames.push(Frame::Text(std::mem::take(&mut out)));
                    }
                    frames.push(marker.into());
                    rest = remainder;
                    continue;
                }
            }

            if complete {
                out.push_str(line);
                out.push('\n');
                self.at_line_start = true;
            } else if self.at_line_start && could_become_marker(line) {
                self.held = line.to_string();
            } else {
                out.push_str(line);
                self.at_line_start = false;
            }
            rest = remainder;
        }

        if !out.is_empty() {
            frames.push(Frame::Text(out));
        }
        frames
    }
}
