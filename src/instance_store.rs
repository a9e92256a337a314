//! Durable instance lookup
//!
//! The instance table is owned by another service; the log server only reads
//! it to learn an instance's phase and supervisor URL. The SQLite store also
//! exposes an upsert so local deployments and tests can seed records.

use crate::error::StoreError;
use crate::model::{InstancePhase, WorkspaceInstance};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspace_instances (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    ide_url TEXT NOT NULL DEFAULT '',
    owner_token TEXT,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_instances_workspace ON workspace_instances(workspace_id);
"#;

/// Read access to instance records
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find_instance_by_id(&self, id: &str) -> Result<Option<WorkspaceInstance>, StoreError>;
}

/// SQLite-backed instance store
pub struct SqliteInstanceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInstanceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Instance store opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create in-memory storage (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn upsert_instance(&self, instance: &WorkspaceInstance) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO workspace_instances (id, workspace_id, owner_id, phase, ide_url, owner_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                instance.id,
                instance.workspace_id,
                instance.owner_id,
                instance.phase.as_str(),
                instance.ide_url,
                instance.owner_token
            ],
        )?;
        Ok(())
    }

    fn find_blocking(conn: &Connection, id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        let row = conn
            .query_row(
                "SELECT id, workspace_id, owner_id, phase, ide_url, owner_token
                 FROM workspace_instances WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, workspace_id, owner_id, phase, ide_url, owner_token)) = row else {
            return Ok(None);
        };
        let phase = phase
            .parse::<InstancePhase>()
            .map_err(|reason| StoreError::Corrupt {
                id: id.clone(),
                reason,
            })?;

        Ok(Some(WorkspaceInstance {
            id,
            workspace_id,
            owner_id,
            phase,
            ide_url,
            owner_token,
        }))
    }
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    async fn find_instance_by_id(&self, id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            Self::find_blocking(&conn, &id)
        })
        .await?
    }
}

/// In-memory instance store for tests and local runs
#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<HashMap<String, WorkspaceInstance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instance: WorkspaceInstance) {
        self.instances.write().insert(instance.id.clone(), instance);
    }

    /// Returns false if the instance is unknown
    pub fn set_phase(&self, id: &str, phase: InstancePhase) -> bool {
        match self.instances.write().get_mut(id) {
            Some(instance) => {
                instance.phase = phase;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) {
        self.instances.write().remove(id);
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn find_instance_by_id(&self, id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        Ok(self.instances.read().get(id).cloned())
    }
}
