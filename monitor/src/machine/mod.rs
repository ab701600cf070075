mod azure;
mod service;

pub use azure::AzureMachineControl;
pub use service::MachineService;

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Power state of a machine as the monitor knows it.
///
/// `LocalError` and `NetworkError` are never reported by the provider; the
/// monitor uses them when it could not get a usable answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachinePowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    LocalError,
    NetworkError,
    Error,
}

impl MachinePowerState {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            MachinePowerState::LocalError | MachinePowerState::NetworkError | MachinePowerState::Error
        )
    }

    /// Maps a provider power state code such as `PowerState/running`.
    pub fn from_provider_code(endpoint: &str, code: Option<&str>) -> Result<Self, FleetError> {
        let state = match code {
            Some("PowerState/running") => MachinePowerState::Running,
            Some("PowerState/deallocating") => MachinePowerState::Deallocating,
            Some("PowerState/deallocated") => MachinePowerState::Deallocated,
            Some("PowerState/starting") => MachinePowerState::Starting,
            Some("PowerState/stopped") => MachinePowerState::Stopped,
            Some("PowerState/stopping") => MachinePowerState::Stopping,
            Some("PowerState/unknown") => MachinePowerState::Error,
            None => MachinePowerState::LocalError,
            Some(value) => {
                return Err(FleetError::UnsupportedPowerState {
                    endpoint: endpoint.to_string(),
                    value: value.to_string(),
                })
            }
        };
        Ok(state)
    }
}

impl fmt::Display for MachinePowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cloud coordinates of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineId {
    pub resource_group: String,
    pub machine_name: String,
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.machine_name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No answer: connection failure or timeout.
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// An answer that could not be understood.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Virtual machine control offered by the cloud provider.
#[async_trait::async_trait]
pub trait MachineControl: Send + Sync {
    async fn start(&self, machine: &MachineId) -> Result<(), ProviderError>;

    /// Powers the machine off while keeping it allocated.
    async fn power_off(&self, machine: &MachineId) -> Result<(), ProviderError>;

    /// Releases the compute resources of a stopped machine.
    async fn deallocate(&self, machine: &MachineId) -> Result<(), ProviderError>;

    /// Raw power state code, `None` when the provider reports none.
    async fn power_state(&self, machine: &MachineId) -> Result<Option<String>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn provider_codes() {
        let map = |code| MachinePowerState::from_provider_code("a", code);
        assert_eq!(map(Some("PowerState/running")), Ok(MachinePowerState::Running));
        assert_eq!(map(Some("PowerState/deallocated")), Ok(MachinePowerState::Deallocated));
        assert_eq!(map(Some("PowerState/unknown")), Ok(MachinePowerState::Error));
        assert_eq!(map(None), Ok(MachinePowerState::LocalError));
        assert_eq!(
            map(Some("PowerState/hibernated")),
            Err(FleetError::UnsupportedPowerState {
                endpoint: "a".into(),
                value: "PowerState/hibernated".into(),
            })
        );
    }

    #[test]
    fn error_states() {
        assert!(MachinePowerState::NetworkError.is_error());
        assert!(MachinePowerState::Error.is_error());
        assert!(!MachinePowerState::Deallocating.is_error());
    }
}
