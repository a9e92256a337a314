//! Supervisor API client
//!
//! Talks to the in-workspace supervisor through its HTTP gateway:
//! - `GET {ideUrl}/_supervisor/v1/status/tasks` for the task status feed
//! - `GET {ideUrl}/_supervisor/v1/terminal/listen/{alias}` for terminal output
//!
//! Both answer with newline-delimited JSON frames, either
//! `{"result": ...}` or `{"error": {"code": <grpc code>, "message": ...}}`.

use crate::error::{SupervisorError, GRPC_UNAVAILABLE};
use crate::model::{SupervisorEndpoint, TaskState, TaskStatus};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

pub const SUPERVISOR_API_PATH: &str = "/_supervisor/v1";

/// Header carrying the instance owner's token
pub const OWNER_TOKEN_HEADER: &str = "x-gitpod-owner-token";

/// gRPC UNKNOWN, used when the gateway gives no better code
const GRPC_UNKNOWN: i32 = 2;

/// Raw terminal output, in order
pub type TerminalStream = BoxStream<'static, Result<Vec<u8>, SupervisorError>>;

/// Read access to a running instance's supervisor
#[async_trait]
pub trait SupervisorApi: Send + Sync {
    /// Query the task status feed once
    async fn tasks_status(
        &self,
        endpoint: &SupervisorEndpoint,
    ) -> Result<Vec<TaskStatus>, SupervisorError>;

    /// Listen to a terminal's output
    async fn listen_terminal(
        &self,
        endpoint: &SupervisorEndpoint,
        alias: &str,
    ) -> Result<TerminalStream, SupervisorError>;
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GatewayFrame<T> {
    result: Option<T>,
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct TasksStatusResult {
    #[serde(default)]
    tasks: Vec<GatewayTask>,
}

#[derive(Debug, Deserialize)]
struct GatewayTask {
    id: String,
    state: TaskState,
    #[serde(default)]
    terminal: String,
    #[serde(default)]
    presentation: Option<TaskPresentation>,
}

#[derive(Debug, Deserialize)]
struct TaskPresentation {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListenResult {
    #[serde(default)]
    data: String,
}

impl From<GatewayTask> for TaskStatus {
    fn from(task: GatewayTask) -> Self {
        Self {
            id: task.id,
            label: task.presentation.map(|p| p.name).unwrap_or_default(),
            terminal: task.terminal,
            state: task.state,
        }
    }
}

/// Build the supervisor API URL from an instance's IDE URL
pub fn supervisor_url(ide_url: &str, path: &str) -> Result<Url, SupervisorError> {
    let mut url = Url::parse(ide_url)
        .map_err(|e| SupervisorError::NotReady(format!("invalid ide url {}: {}", ide_url, e)))?;
    url.set_path(&format!("{}{}", SUPERVISOR_API_PATH, path));
    url.set_query(None);
    Ok(url)
}

fn status_error(status: reqwest::StatusCode, body: String) -> SupervisorError {
    let code = if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        GRPC_UNAVAILABLE
    } else {
        GRPC_UNKNOWN
    };
    SupervisorError::Status {
        code,
        message: format!("HTTP {}: {}", status.as_u16(), body),
    }
}

/// Splits a byte stream into lines
#[derive(Default)]
struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

fn decode_listen_frame(line: &[u8]) -> Option<Result<Vec<u8>, SupervisorError>> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let frame: GatewayFrame<ListenResult> = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => return Some(Err(SupervisorError::Decode(e.to_string()))),
    };
    if let Some(error) = frame.error {
        return Some(Err(SupervisorError::Status {
            code: error.code,
            message: error.message,
        }));
    }
    let result = frame.result?;
    match base64::engine::general_purpose::STANDARD.decode(result.data.as_bytes()) {
        Ok(data) if data.is_empty() => None,
        Ok(data) => Some(Ok(data)),
        Err(e) => Some(Err(SupervisorError::Decode(e.to_string()))),
    }
}

struct ListenState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    lines: LineSplitter,
    ready: VecDeque<Result<Vec<u8>, SupervisorError>>,
    done: bool,
}

/// Supervisor client over the HTTP gateway
pub struct HttpSupervisorClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpSupervisorClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout,
        }
    }

    fn get(&self, url: Url, endpoint: &SupervisorEndpoint) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        match &endpoint.owner_token {
            Some(token) => request = request.header(OWNER_TOKEN_HEADER, token.as_str()),
            None if endpoint.headers.is_empty() => {
                warn!("Supervisor request to {} has neither owner token nor headers", endpoint.url);
            }
            None => {}
        }
        request
    }
}

#[async_trait]
impl SupervisorApi for HttpSupervisorClient {
    async fn tasks_status(
        &self,
        endpoint: &SupervisorEndpoint,
    ) -> Result<Vec<TaskStatus>, SupervisorError> {
        if endpoint.url.is_empty() {
            return Err(SupervisorError::NotReady("instance has no ide url yet".to_string()));
        }
        let url = supervisor_url(&endpoint.url, "/status/tasks")?;
        let resp = self
            .get(url, endpoint)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        // The gateway keeps the stream open when observing; the first frame is all we need
        let body = resp.text().await?;
        let first = body
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| SupervisorError::Decode("empty task status response".to_string()))?;
        let frame: GatewayFrame<TasksStatusResult> =
            serde_json::from_str(first).map_err(|e| SupervisorError::Decode(e.to_string()))?;
        if let Some(error) = frame.error {
            return Err(SupervisorError::Status {
                code: error.code,
                message: error.message,
            });
        }
        let result = frame
            .result
            .ok_or_else(|| SupervisorError::Decode("task status frame without result".to_string()))?;

        debug!("Supervisor at {} reported {} task(s)", endpoint.url, result.tasks.len());
        Ok(result.tasks.into_iter().map(TaskStatus::from).collect())
    }

    async fn listen_terminal(
        &self,
        endpoint: &SupervisorEndpoint,
        alias: &str,
    ) -> Result<TerminalStream, SupervisorError> {
        let url = supervisor_url(&endpoint.url, &format!("/terminal/listen/{}", alias))?;
        let resp = self.get(url, endpoint).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let state = ListenState {
            body: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            lines: LineSplitter::default(),
            ready: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.ready.pop_front() {
                    if item.is_err() {
                        st.done = true;
                        st.ready.clear();
                    }
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(chunk)) => {
                        for line in st.lines.push(&chunk) {
                            if let Some(item) = decode_listen_frame(&line) {
                                st.ready.push_back(item);
                            }
                        }
                    }
                    Some(Err(e)) => st.ready.push_back(Err(SupervisorError::Http(e))),
                    None => {
                        st.done = true;
                        if let Some(item) = st.lines.finish().and_then(|l| decode_listen_frame(&l)) {
                            st.ready.push_back(item);
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
