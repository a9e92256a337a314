//! Retry-driven stream reader
//!
//! Opens a log URL, decodes the chunked body into the buffer and reconnects
//! with exponential backoff until the body ends with the completion status.
//!
//! ```text
//! Connecting ──ok──► Reading ──status 200──► Completed
//!     ▲                 │
//!     │           retryable error
//!     │                 ▼
//!     └──────────── Waiting(delay)
//! ```
//!
//! Non-retryable errors end the session with one `Error` event, unless the
//! stream was opened with [`StreamReader::open_reporting`], which leaves the
//! final error to the caller. Disposing the handle cancels whatever the
//! session is waiting on and emits one `Reset`.

use super::backoff::Backoff;
use super::buffer::{LogEvent, ReplayBuffer};
use super::decoder::{Frame, StreamDecoder};
use crate::config::ReaderConfig;
use crate::error::LogStreamError;
use crate::protocol::{STATUS_COMPLETE, TRAILERS_REQUEST_HEADER};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum ReaderState {
    Connecting,
    Reading(reqwest::Response),
    Waiting(Duration),
    Completed,
    Failed(LogStreamError),
    Cancelled,
}

/// How a stream session ended
#[derive(Debug, Clone)]
pub enum StreamExit {
    /// The body ended with the completion status
    Completed,
    /// Gave up on a non-retryable error
    Failed(Arc<LogStreamError>),
    Cancelled,
}

/// Opens log streams into replay buffers
#[derive(Clone)]
pub struct StreamReader {
    config: ReaderConfig,
    client: reqwest::Client,
}

impl StreamReader {
    pub fn new(config: ReaderConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { config, client }
    }

    /// Start streaming `url` into `buffer`.
    ///
    /// Returns an inert handle without connecting if the buffer already
    /// reached its end or another stream is feeding it.
    pub fn open(&self, url: &str, buffer: Arc<ReplayBuffer>) -> StreamHandle {
        self.start(url, buffer, true)
    }

    /// Like [`open`](Self::open), but a final error is only returned from
    /// [`StreamHandle::join`] and never emitted into the buffer.
    pub fn open_reporting(&self, url: &str, buffer: Arc<ReplayBuffer>) -> StreamHandle {
        self.start(url, buffer, false)
    }

    fn start(&self, url: &str, buffer: Arc<ReplayBuffer>, emit_errors: bool) -> StreamHandle {
        let Some(stream_id) = buffer.begin_stream() else {
            debug!(
                "Not opening {}: buffer {}/{} ended or busy",
                url,
                buffer.key().subject_id,
                buffer.key().task_id
            );
            return StreamHandle::inert();
        };

        let cancel = CancellationToken::new();
        let session = ReadSession {
            client: self.client.clone(),
            url: url.to_string(),
            buffer: buffer.clone(),
            stream_id,
            backoff: Backoff::from_config(&self.config),
            emitted: false,
            emit_errors,
        };
        let task = tokio::spawn(session.run(cancel.clone()));

        StreamHandle {
            active: Some(ActiveStream {
                buffer,
                stream_id,
                cancel,
                task,
            }),
        }
    }
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new(ReaderConfig::default())
    }
}

struct ActiveStream {
    buffer: Arc<ReplayBuffer>,
    stream_id: u64,
    cancel: CancellationToken,
    task: JoinHandle<StreamExit>,
}

/// Owner of a running stream; dropping it disposes the stream
pub struct StreamHandle {
    active: Option<ActiveStream>,
}

impl StreamHandle {
    pub fn inert() -> Self {
        Self { active: None }
    }

    /// True if this handle never started a stream or was already disposed
    pub fn is_inert(&self) -> bool {
        self.active.is_none()
    }

    /// Stop the stream; emits one `Reset` unless it already finished
    pub fn dispose(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if active.buffer.close_stream(active.stream_id, Some(LogEvent::Reset)) {
                debug!("Disposed log stream {}", active.stream_id);
            }
        }
    }

    /// Wait until the stream completes or fails for good.
    ///
    /// `None` for an inert or already finished handle.
    pub async fn join(&mut self) -> Option<StreamExit> {
        let active = self.active.as_mut()?;
        let exit = match (&mut active.task).await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Log stream task failed: {}", e);
                StreamExit::Cancelled
            }
        };
        self.active = None;
        Some(exit)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct ReadSession {
    client: reqwest::Client,
    url: String,
    buffer: Arc<ReplayBuffer>,
    stream_id: u64,
    backoff: Backoff,
    /// Whether the current attempt has emitted output
    emitted: bool,
    /// Whether a final error goes into the buffer as an `Error` event
    emit_errors: bool,
}

impl ReadSession {
    async fn run(mut self, cancel: CancellationToken) -> StreamExit {
        let mut state = ReaderState::Connecting;
        loop {
            state = match state {
                ReaderState::Connecting => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ReaderState::Cancelled,
                    result = self.connect() => match result {
                        Ok(response) => ReaderState::Reading(response),
                        Err(e) => self.on_failure(e),
                    },
                },
                ReaderState::Reading(response) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ReaderState::Cancelled,
                    result = self.read_body(response) => match result {
                        Ok(()) => ReaderState::Completed,
                        Err(e) => self.on_failure(e),
                    },
                },
                ReaderState::Waiting(delay) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ReaderState::Cancelled,
                    _ = tokio::time::sleep(delay) => ReaderState::Connecting,
                },
                ReaderState::Completed => {
                    if self.buffer.end_stream(self.stream_id) {
                        info!("Log stream {} complete", self.url);
                    }
                    return StreamExit::Completed;
                }
                ReaderState::Failed(e) => {
                    let error = Arc::new(e);
                    if self.emit_errors {
                        warn!("Log stream {} failed: {}", self.url, error);
                        self.buffer
                            .close_stream(self.stream_id, Some(LogEvent::Error(error.clone())));
                    } else {
                        debug!("Log stream {} ended: {}", self.url, error);
                        self.buffer.close_stream(self.stream_id, None);
                    }
                    return StreamExit::Failed(error);
                }
                ReaderState::Cancelled => return StreamExit::Cancelled,
            };
        }
    }

    async fn connect(&self) -> Result<reqwest::Response, LogStreamError> {
        let response = self
            .client
            .get(&self.url)
            .header(TRAILERS_REQUEST_HEADER, "trailers")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LogStreamError::from_http_status(status.as_u16(), &self.url));
        }
        Ok(response)
    }

    async fn read_body(&mut self, response: reqwest::Response) -> Result<(), LogStreamError> {
        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                if let Some(outcome) = self.handle_frame(frame) {
                    return outcome;
                }
            }
        }
        for frame in decoder.finish() {
            if let Some(outcome) = self.handle_frame(frame) {
                return outcome;
            }
        }
        Err(LogStreamError::UnexpectedEnd)
    }

    /// Forward text; a marker decides how the attempt ends
    fn handle_frame(&mut self, frame: Frame) -> Option<Result<(), LogStreamError>> {
        match frame {
            Frame::Text(text) => {
                if self.buffer.emit_for(self.stream_id, LogEvent::Logs(text)) {
                    self.emitted = true;
                }
                None
            }
            Frame::Status(STATUS_COMPLETE) => Some(Ok(())),
            Frame::Status(code) => Some(Err(LogStreamError::StreamStatus(code))),
            Frame::NotYetAvailable => Some(Err(LogStreamError::NotYetAvailable)),
        }
    }

    fn on_failure(&mut self, error: LogStreamError) -> ReaderState {
        if !error.is_retryable() {
            return ReaderState::Failed(error);
        }

        if error.resets_backoff() {
            self.backoff.reset();
        }
        if self.emitted {
            // the next attempt delivers the output again from the start
            self.buffer.emit_for(self.stream_id, LogEvent::Reset);
            self.emitted = false;
        }

        let delay = self.backoff.next_delay();
        if matches!(error, LogStreamError::NotYetAvailable) {
            debug!("Log stream {} not yet available, retrying in {:?}", self.url, delay);
        } else {
            warn!(
                "Log stream {} interrupted ({}), retry {} in {:?}",
                self.url,
                error,
                self.backoff.attempt(),
                delay
            );
        }
        ReaderState::Waiting(delay)
    }
}
