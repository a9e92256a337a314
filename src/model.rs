//! Instance and task types shared by the resolver, the server and the stores.
//!
//! Instances are owned by an external system; this crate only ever reads them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of a workspace instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    Unknown,
    Preparing,
    Building,
    Pending,
    Creating,
    Initializing,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

impl InstancePhase {
    /// Whether the supervisor is reachable now or could become reachable soon.
    pub fn is_supervisor_available_soon(&self) -> bool {
        matches!(
            self,
            InstancePhase::Creating
                | InstancePhase::Building
                | InstancePhase::Preparing
                | InstancePhase::Initializing
                | InstancePhase::Pending
                | InstancePhase::Running
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstancePhase::Unknown => "unknown",
            InstancePhase::Preparing => "preparing",
            InstancePhase::Building => "building",
            InstancePhase::Pending => "pending",
            InstancePhase::Creating => "creating",
            InstancePhase::Initializing => "initializing",
            InstancePhase::Running => "running",
            InstancePhase::Interrupted => "interrupted",
            InstancePhase::Stopping => "stopping",
            InstancePhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstancePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(InstancePhase::Unknown),
            "preparing" => Ok(InstancePhase::Preparing),
            "building" => Ok(InstancePhase::Building),
            "pending" => Ok(InstancePhase::Pending),
            "creating" => Ok(InstancePhase::Creating),
            "initializing" => Ok(InstancePhase::Initializing),
            "running" => Ok(InstancePhase::Running),
            "interrupted" => Ok(InstancePhase::Interrupted),
            "stopping" => Ok(InstancePhase::Stopping),
            "stopped" => Ok(InstancePhase::Stopped),
            other => Err(format!("unknown instance phase: {}", other)),
        }
    }
}

/// A workspace instance as recorded in the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInstance {
    pub id: String,
    pub workspace_id: String,
    pub owner_id: String,
    pub phase: InstancePhase,
    /// Empty until the instance has been assigned a URL
    #[serde(default)]
    pub ide_url: String,
    #[serde(default)]
    pub owner_token: Option<String>,
}

impl WorkspaceInstance {
    pub fn new(id: &str, workspace_id: &str, owner_id: &str, phase: InstancePhase) -> Self {
        Self {
            id: id.to_string(),
            workspace_id: workspace_id.to_string(),
            owner_id: owner_id.to_string(),
            phase,
            ide_url: String::new(),
            owner_token: None,
        }
    }

    pub fn with_ide_url(mut self, ide_url: &str, owner_token: Option<&str>) -> Self {
        self.ide_url = ide_url.to_string();
        self.owner_token = owner_token.map(str::to_string);
        self
    }
}

/// Where and how to reach an instance's supervisor
#[derive(Debug, Clone, Default)]
pub struct SupervisorEndpoint {
    pub url: String,
    pub owner_token: Option<String>,
    pub headers: HashMap<String, String>,
}

impl SupervisorEndpoint {
    pub fn for_instance(instance: &WorkspaceInstance) -> Self {
        Self {
            url: instance.ide_url.clone(),
            owner_token: instance.owner_token.clone(),
            headers: HashMap::new(),
        }
    }
}

/// State of a supervisor task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// The task exists but has no terminal yet
    Opening,
    Running,
    /// Terminal state, the task's terminal is gone
    Closed,
}

/// A task as reported by the supervisor's status feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Terminal alias; empty while the task is opening
    #[serde(default)]
    pub terminal: String,
    pub state: TaskState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_availability() {
        for phase in [
            InstancePhase::Creating,
            InstancePhase::Building,
            InstancePhase::Preparing,
            InstancePhase::Initializing,
            InstancePhase::Pending,
            InstancePhase::Running,
        ] {
            assert!(phase.is_supervisor_available_soon(), "{}", phase);
        }
        for phase in [
            InstancePhase::Unknown,
            InstancePhase::Interrupted,
            InstancePhase::Stopping,
            InstancePhase::Stopped,
        ] {
            assert!(!phase.is_supervisor_available_soon(), "{}", phase);
        }
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("running".parse::<InstancePhase>().unwrap(), InstancePhase::Running);
        assert_eq!(InstancePhase::Stopping.to_string(), "stopping");
        assert!("exploded".parse::<InstancePhase>().is_err());
    }

    #[test]
    fn test_task_status_json() {
        let status: TaskStatus =
            serde_json::from_str(r#"{"id":"0","terminal":"t1","state":"RUNNING"}"#).unwrap();
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.terminal, "t1");
        assert!(status.label.is_empty());
    }
}
