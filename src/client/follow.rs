//! Follows one task's log from wherever it currently lives.
//!
//! A live endpoint answers 404 once its instance stops; the follower then
//! resolves again, resets the buffer and continues on the archived endpoint.

use super::api::LogServiceClient;
use super::buffer::{LogEvent, ReplayBuffer};
use super::reader::{StreamExit, StreamReader};
use crate::error::LogStreamError;
use crate::protocol::LogStreamEndpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait before resolving again when the server still hands out a dead URL
const DEFAULT_RESOLVE_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_RESOLVES: u32 = 5;

#[derive(Debug, Clone)]
pub enum FollowOutcome {
    /// The log was read to its end
    Completed,
    /// The stream stopped with a final error
    Failed(Arc<LogStreamError>),
    /// Another reader is already feeding the buffer
    AlreadyStreaming,
    Cancelled,
}

pub struct TaskLogFollower {
    api: LogServiceClient,
    reader: StreamReader,
    resolve_interval: Duration,
    max_resolves: u32,
}

impl TaskLogFollower {
    pub fn new(api: LogServiceClient, reader: StreamReader) -> Self {
        Self {
            api,
            reader,
            resolve_interval: DEFAULT_RESOLVE_INTERVAL,
            max_resolves: DEFAULT_MAX_RESOLVES,
        }
    }

    pub fn with_resolve_interval(mut self, interval: Duration) -> Self {
        self.resolve_interval = interval;
        self
    }

    /// Stream a task's log into `buffer` until it ends, fails or `cancel` fires.
    ///
    /// A live endpoint that is gone is not final: the follower resolves again
    /// and continues elsewhere. Only a failure it gives up on reaches the
    /// buffer, as a single `Error` event.
    pub async fn follow(
        &self,
        instance_id: &str,
        task_id: &str,
        buffer: Arc<ReplayBuffer>,
        cancel: &CancellationToken,
    ) -> FollowOutcome {
        match self.run(instance_id, task_id, &buffer, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Following task {} of {} failed: {}", task_id, instance_id, e);
                let error = Arc::new(e);
                buffer.emit(LogEvent::Error(error.clone()));
                FollowOutcome::Failed(error)
            }
        }
    }

    async fn run(
        &self,
        instance_id: &str,
        task_id: &str,
        buffer: &Arc<ReplayBuffer>,
        cancel: &CancellationToken,
    ) -> Result<FollowOutcome, LogStreamError> {
        let mut previous: Option<LogStreamEndpoint> = None;
        let mut resolves = 0;

        loop {
            if buffer.has_reached_end() {
                return Ok(FollowOutcome::Completed);
            }

            let endpoint = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FollowOutcome::Cancelled),
                result = self.api.resolve(instance_id, task_id) => result?,
            };
            resolves += 1;

            if let Some(previous) = &previous {
                if previous.url == endpoint.url {
                    if resolves >= self.max_resolves {
                        return Err(LogStreamError::NotFound(endpoint.url));
                    }
                    debug!("{} is still the resolved endpoint, waiting", endpoint.url);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(FollowOutcome::Cancelled),
                        _ = tokio::time::sleep(self.resolve_interval) => continue,
                    }
                }
                info!(
                    "Task {} of {} moved to {} (online: {})",
                    task_id, instance_id, endpoint.url, endpoint.online
                );
                buffer.emit(LogEvent::Reset);
            }

            let mut handle = self.reader.open_reporting(&endpoint.url, buffer.clone());
            if handle.is_inert() {
                return Ok(if buffer.has_reached_end() {
                    FollowOutcome::Completed
                } else {
                    FollowOutcome::AlreadyStreaming
                });
            }

            let exit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.dispose();
                    return Ok(FollowOutcome::Cancelled);
                }
                exit = handle.join() => exit,
            };

            match exit {
                Some(StreamExit::Completed) => return Ok(FollowOutcome::Completed),
                Some(StreamExit::Failed(e))
                    if endpoint.online && matches!(*e, LogStreamError::NotFound(_)) =>
                {
                    debug!("Live log of task {} is gone, resolving again", task_id);
                    previous = Some(endpoint);
                }
                Some(StreamExit::Failed(e)) => {
                    buffer.emit(LogEvent::Error(e.clone()));
                    return Ok(FollowOutcome::Failed(e));
                }
                Some(StreamExit::Cancelled) | None => return Ok(FollowOutcome::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::buffer::{BufferKey, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::config::ReaderConfig;
    use httpmock::prelude::*;

    fn reader() -> StreamReader {
        StreamReader::new(ReaderConfig {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            ..Default::default()
        })
    }

    fn buffer() -> Arc<ReplayBuffer> {
        Arc::new(ReplayBuffer::new(BufferKey::new("inst-1", "0")))
    }

    #[tokio::test]
    async fn test_switches_from_live_to_archive() {
        use axum::{http::StatusCode, routing::get, Json, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let resolves = Arc::new(AtomicUsize::new(0));

        // the first resolve is live, every later one archived
        let endpoints = [
            LogStreamEndpoint {
                task_id: "0".into(),
                url: format!("{}/headless-logs/inst-1/t0", base_url),
                online: true,
            },
            LogStreamEndpoint {
                task_id: "0".into(),
                url: format!("{}/headless-log-download/inst-1/0", base_url),
                online: false,
            },
        ];
        let counter = resolves.clone();
        let app = Router::new()
            .route(
                "/api/v1/instances/inst-1/logs",
                get(move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let endpoint = endpoints[n.min(1)].clone();
                    async move { Json(endpoint) }
                }),
            )
            .route(
                "/headless-logs/inst-1/t0",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            )
            .route(
                "/headless-log-download/inst-1/0",
                get(|| async { "full log\nX-LogStream-Status/v1:200\n" }),
            );
        tokio::spawn(async move { axum::serve(listener, app).await });

        let buffer = buffer();
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = errors.clone();
            buffer.on(EventKind::Error, move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }
        let follower = TaskLogFollower::new(LogServiceClient::new(&base_url), reader())
            .with_resolve_interval(Duration::from_millis(10));
        let outcome = follower
            .follow("inst-1", "0", buffer.clone(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, FollowOutcome::Completed));
        assert_eq!(resolves.load(Ordering::SeqCst), 2);
        assert_eq!(buffer.current_text(), "full log\n");
        // the live 404 was handled by moving to the archive, not surfaced
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        let kinds: Vec<EventKind> = buffer.snapshot().iter().map(LogEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Reset, EventKind::Logs, EventKind::End]);
    }

    #[tokio::test]
    async fn test_archived_not_found_is_final() {
        let server = MockServer::start_async().await;
        let url = server.url("/headless-log-download/inst-1/0");
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/instances/inst-1/logs");
                then.status(200).json_body(serde_json::json!({
                    "task_id": "0", "url": url, "online": false
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/headless-log-download/inst-1/0");
                then.status(404);
            })
            .await;

        let buffer = buffer();
        let follower = TaskLogFollower::new(LogServiceClient::new(&server.base_url()), reader());
        let outcome = follower
            .follow("inst-1", "0", buffer.clone(), &CancellationToken::new())
            .await;
        match outcome {
            FollowOutcome::Failed(e) => assert!(matches!(*e, LogStreamError::NotFound(_))),
            other => panic!("unexpected {:?}", other),
        }
        let errors = buffer
            .snapshot()
            .iter()
            .filter(|e| matches!(e, LogEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_ended_buffer_completes_immediately() {
        let server = MockServer::start_async().await;
        let resolve = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/instances/inst-1/logs");
                then.status(500);
            })
            .await;

        let buffer = buffer();
        buffer.mark_reached_end();
        let follower = TaskLogFollower::new(LogServiceClient::new(&server.base_url()), reader());
        let outcome = follower
            .follow("inst-1", "0", buffer, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, FollowOutcome::Completed));
        assert_eq!(resolve.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_gives_up_when_live_endpoint_stays_gone() {
        let server = MockServer::start_async().await;
        let url = server.url("/headless-logs/inst-1/t0");
        let resolve = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/instances/inst-1/logs");
                then.status(200).json_body(serde_json::json!({
                    "task_id": "0", "url": url, "online": true
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/headless-logs/inst-1/t0");
                then.status(404);
            })
            .await;

        let buffer = buffer();
        let follower = TaskLogFollower::new(LogServiceClient::new(&server.base_url()), reader())
            .with_resolve_interval(Duration::from_millis(5));
        let outcome = follower
            .follow("inst-1", "0", buffer.clone(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, FollowOutcome::Failed(_)));
        assert_eq!(resolve.hits_async().await, DEFAULT_MAX_RESOLVES as usize);
        let kinds: Vec<EventKind> = buffer.snapshot().iter().map(LogEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Error]);
    }
}
