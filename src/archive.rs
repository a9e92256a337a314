//! Archived headless log store
//!
//! Once an instance stops, its task logs live in content storage. The store
//! lists which tasks have logs and hands out signed download URLs; the log
//! server proxies those downloads so every body follows the same wire convention.

use crate::error::ArchiveError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Identifies one instance's archived logs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub owner_id: String,
    pub workspace_id: String,
    pub instance_id: String,
}

impl ArchiveKey {
    pub fn new(owner_id: &str, workspace_id: &str, instance_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            workspace_id: workspace_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

#[async_trait]
pub trait ArchivedLogStore: Send + Sync {
    /// Task ids that have archived logs for this instance
    async fn list_logs(&self, key: &ArchiveKey) -> Result<Vec<String>, ArchiveError>;

    /// Signed download URL for one task's log, `None` if there is none
    async fn download_url(
        &self,
        key: &ArchiveKey,
        task_id: &str,
    ) -> Result<Option<String>, ArchiveError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListLogsResponse {
    #[serde(default)]
    task_id: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    url: String,
}

/// Client for the content service's headless log API
pub struct HttpArchiveClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpArchiveClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn query<'a>(key: &'a ArchiveKey) -> Vec<(&'static str, &'a str)> {
        vec![
            ("ownerId", key.owner_id.as_str()),
            ("workspaceId", key.workspace_id.as_str()),
            ("instanceId", key.instance_id.as_str()),
        ]
    }
}

#[async_trait]
impl ArchivedLogStore for HttpArchiveClient {
    async fn list_logs(&self, key: &ArchiveKey) -> Result<Vec<String>, ArchiveError> {
        let resp = self
            .client
            .get(format!("{}/v1/headless-logs", self.base_url))
            .query(&Self::query(key))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ArchiveError::Status(resp.status().as_u16()));
        }

        let body: ListLogsResponse = resp.json().await?;
        debug!(
            "Archive lists {} task log(s) for instance {}",
            body.task_id.len(),
            key.instance_id
        );
        Ok(body.task_id)
    }

    async fn download_url(
        &self,
        key: &ArchiveKey,
        task_id: &str,
    ) -> Result<Option<String>, ArchiveError> {
        let mut query = Self::query(key);
        query.push(("taskId", task_id));
        let resp = self
            .client
            .get(format!("{}/v1/headless-logs/download-url", self.base_url))
            .query(&query)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ArchiveError::Status(resp.status().as_u16()));
        }

        let body: DownloadUrlResponse = resp.json().await?;
        Ok(Some(body.url))
    }
}

/// In-memory archive for tests and local runs
#[derive(Default)]
pub struct MemoryArchive {
    logs: RwLock<HashMap<ArchiveKey, Vec<(String, String)>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task log reachable at `url`
    pub fn insert(&self, key: ArchiveKey, task_id: &str, url: &str) {
        let mut logs = self.logs.write();
        let entries = logs.entry(key).or_default();
        entries.retain(|(id, _)| id != task_id);
        entries.push((task_id.to_string(), url.to_string()));
    }
}

#[async_trait]
impl ArchivedLogStore for MemoryArchive {
    async fn list_logs(&self, key: &ArchiveKey) -> Result<Vec<String>, ArchiveError> {
        Ok(self
            .logs
            .read()
            .get(key)
            .map(|entries| entries.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default())
    }

    async fn download_url(
        &self,
        key: &ArchiveKey,
        task_id: &str,
    ) -> Result<Option<String>, ArchiveError> {
        Ok(self.logs.read().get(key).and_then(|entries| {
            entries
                .iter()
                .find(|(id, _)| id == task_id)
                .map(|(_, url)| url.clone())
        }))
    }
}
