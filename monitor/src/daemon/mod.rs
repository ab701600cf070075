mod rpc;

pub use rpc::RpcDaemonClients;

use crate::error::RpcError;
use mcfleet_protocol::management::server::{
    OnlinePlayers, OperationOutcome, PublicServerStatus, ServerOperation,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server state as the monitor records it: what the daemon reported, or why
/// nothing usable was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Stopped,
    Running,
    NetworkError,
    LocalError,
    Error,
}

impl ServerStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ServerStatus::NetworkError | ServerStatus::LocalError | ServerStatus::Error
        )
    }
}

impl From<PublicServerStatus> for ServerStatus {
    fn from(value: PublicServerStatus) -> Self {
        match value {
            PublicServerStatus::Stopped => ServerStatus::Stopped,
            PublicServerStatus::Running => ServerStatus::Running,
            PublicServerStatus::Error => ServerStatus::Error,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Control plane side of the daemons, addressed by endpoint name.
#[async_trait::async_trait]
pub trait ServerDaemon: Send + Sync {
    async fn get_status(&self, name: &str) -> Result<PublicServerStatus, RpcError>;

    async fn list_users(&self, name: &str) -> Result<OnlinePlayers, RpcError>;

    /// A refused operation is an `Ok` outcome with `completed == false`.
    async fn operation(
        &self,
        name: &str,
        operation: ServerOperation,
    ) -> Result<OperationOutcome, RpcError>;
}
