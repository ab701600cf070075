use thiserror::Error;

/// Failures the fleet monitor cannot fold into a status value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FleetError {
    #[error("unknown endpoint `{0}'")]
    UnknownEndpoint(String),
    #[error("endpoint `{endpoint}' reported unsupported power state `{value}'")]
    UnsupportedPowerState { endpoint: String, value: String },
}

/// Outcome of a daemon call that did not produce an answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("unknown endpoint `{0}'")]
    UnknownEndpoint(String),
    /// The daemon could not be reached or answered something unusable; the
    /// cause is only kept for logging.
    #[error("daemon `{endpoint}' unreachable: {reason}")]
    Network { endpoint: String, reason: String },
}
