//! Error types for the log service and the stream reader.

use thiserror::Error;

/// gRPC status code the supervisor gateway uses for "not reachable (yet)"
pub const GRPC_UNAVAILABLE: i32 = 14;

/// Errors talking to an instance's supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Too early: the instance or one of its tasks is not ready yet
    #[error("supervisor not ready: {0}")]
    NotReady(String),
    #[error("supervisor ended with status code {code}: {message}")]
    Status { code: i32, message: String },
    #[error("supervisor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed supervisor response: {0}")]
    Decode(String),
}

impl SupervisorError {
    pub fn is_unavailable(&self) -> bool {
        match self {
            SupervisorError::Status { code, .. } => *code == GRPC_UNAVAILABLE,
            _ => false,
        }
    }
}

/// Errors from the archived log store
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("archive returned status {0}")]
    Status(u16),
}

/// Errors from the durable instance store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt instance record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors resolving log endpoints
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),
    #[error("task {task_id} not found on instance {instance_id}")]
    TaskNotFound {
        instance_id: String,
        task_id: String,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors observed by the client-side stream reader
#[derive(Debug, Error)]
pub enum LogStreamError {
    /// 4xx on the connection itself, never retried
    #[error("log stream rejected with HTTP {status}")]
    TransportFatal { status: u16 },
    /// Non-200 status sentinel embedded in the body
    #[error("log stream ended with status {0}")]
    StreamStatus(u16),
    /// Producer has not started yet; expected while a task boots
    #[error("headless log not yet available")]
    NotYetAvailable,
    #[error("log stream not found: {0}")]
    NotFound(String),
    #[error("log stream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("log stream returned HTTP {0}")]
    Http(u16),
    #[error("log stream ended without status")]
    UnexpectedEnd,
    #[error("log service error: {0}")]
    Api(String),
}

impl LogStreamError {
    /// Classify an HTTP status on the connection itself
    pub fn from_http_status(status: u16, url: &str) -> Self {
        match status {
            404 => LogStreamError::NotFound(url.to_string()),
            408 | 429 => LogStreamError::Http(status),
            400..=499 => LogStreamError::TransportFatal { status },
            _ => LogStreamError::Http(status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LogStreamError::TransportFatal { .. }
                | LogStreamError::NotFound(_)
                | LogStreamError::Api(_)
        )
    }

    /// Whether this error restarts exponential backoff from its initial delay
    pub fn resets_backoff(&self) -> bool {
        matches!(self, LogStreamError::NotYetAvailable)
    }
}
