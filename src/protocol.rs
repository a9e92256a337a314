//! Wire convention between the log server and stream readers.
//!
//! Intermediate proxies do not reliably forward HTTP trailers, so the server
//! ends every log body with an in-band line instead:
//!
//! ```text
//! X-LogStream-Status/v1:<code>      end of stream, 200 = complete
//! X-LogStream-NotYetAvailable/v1    producer has not started, try again
//! ```
//!
//! Both lines start at a line boundary and are terminated by `\n`. The server
//! inserts a `\n` first when the forwarded output did not end with one.
//! Changing either format requires bumping the version suffix on both sides.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of the status sentinel line
pub const STREAM_STATUS_MARKER: &str = "X-LogStream-Status/v1";

/// The "not yet available" signature line
pub const NOT_YET_AVAILABLE_MARKER: &str = "X-LogStream-NotYetAvailable/v1";

/// Status code signalling a clean end of stream
pub const STATUS_COMPLETE: u16 = 200;

/// Header name readers send to ask for real trailers, best effort
pub const TRAILERS_REQUEST_HEADER: &str = "TE";

static STATUS_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^X-LogStream-Status/v1:(\d{1,3})$").expect("status line regex is valid")
});

/// In-band signal carried by a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Status(u16),
    NotYetAvailable,
}

/// Render the status sentinel line, including its terminating newline
pub fn status_line(code: u16) -> String {
    format!("{}:{}\n", STREAM_STATUS_MARKER, code)
}

/// Render the not-yet-available line, including its terminating newline
pub fn not_yet_available_line() -> String {
    format!("{}\n", NOT_YET_AVAILABLE_MARKER)
}

/// Parse one line (without its `\n`) as a marker
pub fn parse_marker_line(line: &str) -> Option<Marker> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line == NOT_YET_AVAILABLE_MARKER {
        return Some(Marker::NotYetAvailable);
    }
    STATUS_LINE_RE
        .captures(line)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .map(Marker::Status)
}

/// Whether an unterminated line could still turn into a marker once more bytes arrive
pub fn could_become_marker(partial: &str) -> bool {
    if partial.is_empty() {
        return false;
    }
    let partial = partial.strip_suffix('\r').unwrap_or(partial);
    if NOT_YET_AVAILABLE_MARKER.starts_with(partial) || STREAM_STATUS_MARKER.starts_with(partial) {
        return true;
    }
    match partial.strip_prefix(STREAM_STATUS_MARKER) {
        Some(rest) => match rest.strip_prefix(':') {
            Some(digits) => digits.len() <= 3 && digits.bytes().all(|b| b.is_ascii_digit()),
            None => rest.is_empty(),
        },
        None => false,
    }
}

/// One task's log URL as handed out by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStreamEndpoint {
    pub task_id: String,
    pub url: String,
    /// true: live supervisor output, false: archived storage
    pub online: bool,
}

/// All log URLs of an instance, keyed by task id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessLogUrls {
    pub streams: BTreeMap<String, LogStreamEndpoint>,
}

impl HeadlessLogUrls {
    pub fn insert(&mut self, endpoint: LogStreamEndpoint) {
        self.streams.insert(endpoint.task_id.clone(), endpoint);
    }

    pub fn get(&self, task_id: &str) -> Option<&LogStreamEndpoint> {
        self.streams.get(task_id)
    }

    pub fn is_online(&self) -> bool {
        self.streams.values().any(|e| e.online)
    }
}

/// Error body returned by the JSON endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_roundtrip() {
        let line = status_line(403);
        assert_eq!(line, "X-LogStream-Status/v1:403\n");
        assert_eq!(
            parse_marker_line(line.trim_end_matches('\n')),
            Some(Marker::Status(403))
        );
    }

    #[test]
    fn test_parse_rejects_lookalikes() {
        assert_eq!(parse_marker_line("X-LogStream-Status/v1:"), None);
        assert_eq!(parse_marker_line("X-LogStream-Status/v1:2000"), None);
        assert_eq!(parse_marker_line(" X-LogStream-Status/v1:200"), None);
        assert_eq!(parse_marker_line("X-LogStream-Status/v2:200"), None);
        assert_eq!(parse_marker_line("building... X-LogStream-Status/v1:200"), None);
        assert_eq!(
            parse_marker_line("X-LogStream-Status/v1:200\r"),
            Some(Marker::Status(200))
        );
        assert_eq!(
            parse_marker_line(NOT_YET_AVAILABLE_MARKER),
            Some(Marker::NotYetAvailable)
        );
    }

    #[test]
    fn test_could_become_marker() {
        assert!(could_become_marker("X-Log"));
        assert!(could_become_marker("X-LogStream-Status/v1"));
        assert!(could_become_marker("X-LogStream-Status/v1:"));
        assert!(could_become_marker("X-LogStream-Status/v1:20"));
        assert!(could_become_marker("X-LogStream-NotYet"));
        assert!(!could_become_marker(""));
        assert!(!could_become_marker("npm install"));
        assert!(!could_become_marker("X-LogStream-Status/v1:2000"));
        assert!(!could_become_marker("X-LogStream-Status/v1x"));
    }

    #[test]
    fn test_urls_online() {
        let mut urls = HeadlessLogUrls::default();
        assert!(!urls.is_online());
        urls.insert(LogStreamEndpoint {
            task_id: "0".to_string(),
            url: "http://h/headless-logs/i/t".to_string(),
            online: true,
        });
        assert!(urls.is_online());
        assert_eq!(urls.get("0").unwrap().url, "http://h/headless-logs/i/t");
    }
}
