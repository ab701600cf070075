mod config_file;
mod shutdown;

pub use config_file::{ConfigError, ConfigFile};
pub use shutdown::{Driver, GracefulShutdown, Shutdown, ShutdownSignal};
