mod output;
mod process;
mod status;
mod supervisor;

pub use status::ServerProcessState;
pub use supervisor::{StopOutcome, Supervisor};
