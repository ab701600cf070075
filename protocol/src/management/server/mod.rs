mod operation;
mod players;
mod status;

pub use operation::{OperationOutcome, ServerOperation};
pub use players::OnlinePlayers;
pub use status::PublicServerStatus;
