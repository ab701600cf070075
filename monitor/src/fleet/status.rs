use crate::daemon::ServerStatus;
use crate::machine::MachinePowerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub power_state: MachinePowerState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusReport {
    pub status: ServerStatus,
    pub online: u32,
    pub max: u32,
    #[serde(default)]
    pub players: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// What one poll learned about one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub name: String,
    pub machine: MachineStatus,
    pub server: ServerStatusReport,
}

impl EndpointStatus {
    /// Placeholder until the first poll completes.
    pub fn unobserved(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            machine: MachineStatus {
                power_state: MachinePowerState::LocalError,
                timestamp: now,
            },
            server: ServerStatusReport {
                status: ServerStatus::LocalError,
                online: 0,
                max: 0,
                players: vec![],
                timestamp: now,
            },
        }
    }
}

/// Whole-fleet view, in configuration order. Replaced, never mutated.
pub type Snapshot = Arc<Vec<EndpointStatus>>;
