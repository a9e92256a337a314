//! HTTP client for the log server's resolve endpoint.

use crate::error::LogStreamError;
use crate::protocol::{ErrorResponse, HeadlessLogUrls, LogStreamEndpoint};
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LogServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl LogServiceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log URLs of every task of an instance
    pub async fn resolve_urls(&self, instance_id: &str) -> Result<HeadlessLogUrls, LogStreamError> {
        let url = format!("{}/api/v1/instances/{}/logs", self.base_url, instance_id);
        self.get_json(&url, &[]).await
    }

    /// Log URL of one task
    pub async fn resolve(
        &self,
        instance_id: &str,
        task_id: &str,
    ) -> Result<LogStreamEndpoint, LogStreamError> {
        let url = format!("{}/api/v1/instances/{}/logs", self.base_url, instance_id);
        let endpoint: LogStreamEndpoint = self.get_json(&url, &[("task", task_id)]).await?;
        debug!(
            "Task {} of {} resolved to {} (online: {})",
            task_id, instance_id, endpoint.url, endpoint.online
        );
        Ok(endpoint)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, LogStreamError> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let message = match resp.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => format!("HTTP {}", status.as_u16()),
        };
        if status == reqwest::StatusCode::NOT_FOUND {
            Err(LogStreamError::NotFound(message))
        } else {
            Err(LogStreamError::Api(message))
        }
    }
}
