//! Sentinel-terminated streaming response bodies.

use crate::protocol::{not_yet_available_line, status_line};
use axum::body::{Body, Bytes};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type BodySender = mpsc::Sender<Result<Bytes, Infallible>>;

/// Writes log output into a streaming body and ends it with exactly one marker line
pub struct SentinelWriter {
    tx: BodySender,
    ends_with_newline: bool,
    wrote_any: bool,
}

impl SentinelWriter {
    /// Create a writer and the response body it feeds
    pub fn channel(capacity: usize) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = Self {
            tx,
            ends_with_newline: true,
            wrote_any: false,
        };
        (writer, Body::from_stream(ReceiverStream::new(rx)))
    }

    /// Forward a chunk. Returns false once the client is gone.
    pub async fn write(&mut self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.ends_with_newline = chunk.last() == Some(&b'\n');
        self.wrote_any = true;
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    pub fn has_output(&self) -> bool {
        self.wrote_any
    }

    /// Sender handle for watching client disconnects via `closed()`
    pub fn sender(&self) -> BodySender {
        self.tx.clone()
    }

    /// End the body with a status line
    pub async fn finish(self, code: u16) {
        let line = status_line(code);
        self.terminate(line).await;
    }

    /// End the body with the not-yet-available signature
    pub async fn not_yet_available(self) {
        self.terminate(not_yet_available_line()).await;
    }

    async fn terminate(self, line: String) {
        let mut tail = String::with_capacity(line.len() + 1);
        if !self.ends_with_newline {
            tail.push('\n');
        }
        tail.push_str(&line);
        // the client may already be gone; nothing left to tell it
        let _ = self.tx.send(Ok(Bytes::from(tail))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: Body) -> String {
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_newline_inserted_before_sentinel() {
        let (mut writer, body) = SentinelWriter::channel(8);
        assert!(writer.write(Bytes::from_static(b"no newline")).await);
        writer.finish(200).await;
        assert_eq!(collect(body).await, "no newline\nX-LogStream-Status/v1:200\n");
    }

    #[tokio::test]
    async fn test_no_extra_newline_after_complete_line() {
        let (mut writer, body) = SentinelWriter::channel(8);
        writer.write(Bytes::from_static(b"line\n")).await;
        assert!(writer.has_output());
        writer.finish(500).await;
        assert_eq!(collect(body).await, "line\nX-LogStream-Status/v1:500\n");
    }

    #[tokio::test]
    async fn test_empty_body_not_yet_available() {
        let (writer, body) = SentinelWriter::channel(8);
        assert!(!writer.has_output());
        writer.not_yet_available().await;
        assert_eq!(collect(body).await, "X-LogStream-NotYetAvailable/v1\n");
    }

    #[tokio::test]
    async fn test_write_reports_disconnect() {
        let (mut writer, body) = SentinelWriter::channel(8);
        drop(body);
        assert!(!writer.write(Bytes::from_static(b"x")).await);
        writer.sender().closed().await;
    }
}
