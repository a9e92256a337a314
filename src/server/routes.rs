use super::body::SentinelWriter;
use super::LogServerState;
use crate::error::ResolveError;
use crate::model::WorkspaceInstance;
use crate::protocol::{ErrorResponse, STATUS_COMPLETE};
use crate::resolver::HeadlessLogResolver;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

/// Buffered chunks between the upstream reader and the response body
const BODY_CHANNEL_CAPACITY: usize = 32;

/// Status sent when the instance stopped before producing any output
const STATUS_UNAVAILABLE: u16 = 503;
/// Status sent when the supervisor stream failed
const STATUS_FAILED: u16 = 500;
/// Status sent when the archived log could not be fetched
const STATUS_BAD_UPSTREAM: u16 = 502;

pub(super) async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub(super) struct LogUrlsQuery {
    task: Option<String>,
}

fn resolve_error_response(err: ResolveError) -> Response {
    let status = match &err {
        ResolveError::InstanceNotFound(_) | ResolveError::TaskNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ResolveError::Archive(_) => StatusCode::BAD_GATEWAY,
        ResolveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::NOT_FOUND {
        warn!("Log resolution failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn log_body_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
        .into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, message).into_response()
}

async fn lookup(state: &LogServerState, instance_id: &str) -> Result<WorkspaceInstance, Response> {
    state
        .resolver
        .find_instance(instance_id)
        .await
        .map_err(|e| match e {
            ResolveError::InstanceNotFound(id) => not_found(format!("instance {} not found", id)),
            e => {
                warn!("Instance lookup for {} failed: {}", instance_id, e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        })
}

pub(super) async fn get_log_urls(
    State(state): State<Arc<LogServerState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<LogUrlsQuery>,
) -> Response {
    let instance = match state.resolver.find_instance(&instance_id).await {
        Ok(instance) => instance,
        Err(e) => return resolve_error_response(e),
    };

    match query.task {
        Some(task_id) => match state.resolver.resolve(&instance, &task_id).await {
            Ok(endpoint) => Json(endpoint).into_response(),
            Err(e) => resolve_error_response(e),
        },
        None => match state.resolver.resolve_urls(&instance).await {
            Ok(urls) => Json(urls).into_response(),
            Err(e) => resolve_error_response(e),
        },
    }
}

pub(super) async fn stream_live_log(
    State(state): State<Arc<LogServerState>>,
    Path((instance_id, terminal_id)): Path<(String, String)>,
) -> Response {
    let instance = match lookup(&state, &instance_id).await {
        Ok(instance) => instance,
        Err(response) => return response,
    };
    if !instance.phase.is_supervisor_available_soon() {
        return not_found(format!(
            "instance {} is {} and has no live logs",
            instance.id, instance.phase
        ));
    }

    let (writer, body) = SentinelWriter::channel(BODY_CHANNEL_CAPACITY);
    if instance.ide_url.is_empty() {
        writer.not_yet_available().await;
        return log_body_response(body);
    }

    let span = info_span!(
        "live_log",
        session = %Uuid::new_v4(),
        instance = %instance.id,
        terminal = %terminal_id
    );
    tokio::spawn(
        forward_live_log(state.resolver.clone(), instance, terminal_id, writer).instrument(span),
    );
    log_body_response(body)
}

async fn forward_live_log(
    resolver: Arc<HeadlessLogResolver>,
    instance: WorkspaceInstance,
    terminal_id: String,
    mut writer: SentinelWriter,
) {
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(BODY_CHANNEL_CAPACITY);
    let watch = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            resolver
                .stream_task_log_while_running(&instance, &terminal_id, tx, cancel)
                .await
        })
    };

    let downstream = writer.sender();
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    if !writer.write(Bytes::from(chunk)).await {
                        debug!("Client went away");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
            _ = downstream.closed() => {
                debug!("Client went away");
                cancel.cancel();
                break;
            }
        }
    }
    drop(rx);
    drop(downstream);

    let code = match watch.await {
        Ok(Ok(summary)) if summary.completed || writer.has_output() => STATUS_COMPLETE,
        Ok(Ok(_)) => STATUS_UNAVAILABLE,
        Ok(Err(e)) => {
            warn!("Live log stream failed: {}", e);
            STATUS_FAILED
        }
        Err(e) => {
            error!("Live log task panicked: {}", e);
            STATUS_FAILED
        }
    };
    writer.finish(code).await;
}

pub(super) async fn download_archived_log(
    State(state): State<Arc<LogServerState>>,
    Path((instance_id, task_id)): Path<(String, String)>,
) -> Response {
    let instance = match lookup(&state, &instance_id).await {
        Ok(instance) => instance,
        Err(response) => return response,
    };
    let Some(url) = state.resolver.archived_download_url(&instance, &task_id).await else {
        return not_found(format!(
            "no archived log for task {} of instance {}",
            task_id, instance.id
        ));
    };

    let (writer, body) = SentinelWriter::channel(BODY_CHANNEL_CAPACITY);
    let span = info_span!(
        "archived_log",
        session = %Uuid::new_v4(),
        instance = %instance.id,
        task = %task_id
    );
    tokio::spawn(proxy_download(state.http.clone(), url, writer).instrument(span));
    log_body_response(body)
}

async fn proxy_download(http: reqwest::Client, url: String, mut writer: SentinelWriter) {
    let resp = match http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!("Archived log download returned HTTP {}", resp.status());
            writer.finish(STATUS_BAD_UPSTREAM).await;
            return;
        }
        Err(e) => {
            warn!("Archived log download failed: {}", e);
            writer.finish(STATUS_BAD_UPSTREAM).await;
            return;
        }
    };

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if !writer.write(bytes).await {
                    debug!("Client went away");
                    return;
                }
            }
            Err(e) => {
                warn!("Archived log download interrupted: {}", e);
                writer.finish(STATUS_BAD_UPSTREAM).await;
                return;
            }
        }
    }
    writer.finish(STATUS_COMPLETE).await;
}
