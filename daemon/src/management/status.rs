use mcfleet_protocol::management::server::PublicServerStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl From<ServerProcessState> for PublicServerStatus {
    fn from(value: ServerProcessState) -> Self {
        match value {
            ServerProcessState::Stopped | ServerProcessState::Starting => PublicServerStatus::Stopped,
            ServerProcessState::Running | ServerProcessState::Stopping => PublicServerStatus::Running,
            ServerProcessState::Error => PublicServerStatus::Error,
        }
    }
}

/// Console commands the daemon is allowed to type into the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Stop,
    List,
}

impl ServerCommand {
    pub fn as_line(&self) -> &'static str {
        match self {
            ServerCommand::Stop => "stop\n",
            ServerCommand::List => "list\n",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_states_collapse() {
        assert_eq!(
            PublicServerStatus::from(ServerProcessState::Starting),
            PublicServerStatus::Stopped
        );
        assert_eq!(
            PublicServerStatus::from(ServerProcessState::Stopping),
            PublicServerStatus::Running
        );
        assert_eq!(
            PublicServerStatus::from(ServerProcessState::Error),
            PublicServerStatus::Error
        );
    }
}
