use anyhow::Context;
use log::{debug, info};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::drivers::{LifecycleDriver, RpcDriver};
use crate::management::Supervisor;
use crate::protocols::v1::ProtocolV1;
use mcfleet_protocol::utils::{GracefulShutdown, Shutdown};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

pub async fn run_app() -> anyhow::Result<()> {
    info!("mcfleet daemon v{}", VERSION);

    let path = config_path();
    let config = AppConfig::init(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    debug!("config loaded: {:?}", config);

    let supervisor = Supervisor::new(config.server.clone());
    let protocol = ProtocolV1::new(supervisor.clone(), config.server.stop_timeout());

    let mut gs = GracefulShutdown::new(Shutdown::new());
    gs.add_driver(RpcDriver::new(&config.rpc, protocol)?);
    gs.add_driver(LifecycleDriver::new(
        supervisor,
        config.autostart,
        config.server.stop_timeout(),
    ));

    gs.watch().await?;
    info!("Bye.");
    Ok(())
}
