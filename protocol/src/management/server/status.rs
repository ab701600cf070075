use serde::{Deserialize, Serialize};
use std::fmt;

/// Server state as seen from outside the daemon.
///
/// Transient process states never cross the wire: a starting server reports
/// `Stopped`, a stopping server reports `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicServerStatus {
    Stopped,
    Running,
    Error,
}

impl fmt::Display for PublicServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicServerStatus::Stopped => "stopped",
            PublicServerStatus::Running => "running",
            PublicServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}
