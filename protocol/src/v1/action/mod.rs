mod actions;
pub mod retcode;
pub mod status;

pub use actions::{ActionParameters, ActionRequest, ActionResponse, ActionResults};
