//! Headless log server
//!
//! ```text
//! GET /health                                          liveness
//! GET /api/v1/instances/:instance_id/logs[?task=<id>]  resolve log URLs
//! GET /headless-logs/:instance_id/:terminal_id         live supervisor output
//! GET /headless-log-download/:instance_id/:task_id     archived log proxy
//! ```
//!
//! Both log endpoints stream `text/plain` and always end with one marker line
//! (see [`crate::protocol`]).

pub mod body;
mod routes;

pub use body::SentinelWriter;

use crate::config::LogServiceConfig;
use crate::resolver::HeadlessLogResolver;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
pub struct LogServerState {
    pub resolver: Arc<HeadlessLogResolver>,
    /// Client for proxying archived downloads
    pub http: reqwest::Client,
}

pub struct LogServer {
    host: String,
    port: u16,
    state: Arc<LogServerState>,
}

impl LogServer {
    pub fn new(config: &LogServiceConfig, resolver: Arc<HeadlessLogResolver>) -> Self {
        Self {
            host: config.listen_host.clone(),
            port: config.listen_port,
            state: Arc::new(LogServerState {
                resolver,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health_check))
            // URL resolution
            .route("/api/v1/instances/:instance_id/logs", get(routes::get_log_urls))
            // Log bodies
            .route(
                "/headless-logs/:instance_id/:terminal_id",
                get(routes::stream_live_log),
            )
            .route(
                "/headless-log-download/:instance_id/:task_id",
                get(routes::download_archived_log),
            )
            .layer(
                ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
            )
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Start the log server
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("Headless log server listening on {}", addr);

        self.serve(listener).await
    }
}
