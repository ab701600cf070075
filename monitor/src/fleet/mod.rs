mod clock;
mod decision;
mod monitor;
mod publisher;
mod status;

pub use decision::Thresholds;
pub use monitor::Monitor;
pub use publisher::StatusPublisher;
pub use status::{EndpointStatus, MachineStatus, ServerStatusReport, Snapshot};

#[cfg(test)]
pub(crate) use monitor::tests as monitor_tests;
