use anyhow::Context;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::daemon::RpcDaemonClients;
use crate::drivers::{HttpDriver, PollDriver, StatusHub};
use crate::fleet::{Monitor, Thresholds};
use crate::machine::{AzureMachineControl, MachineService};
use mcfleet_protocol::utils::{GracefulShutdown, Shutdown};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

pub async fn run_app() -> anyhow::Result<()> {
    info!("mcfleet monitor v{}", VERSION);

    let path = config_path();
    let config = AppConfig::init(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    debug!("{} endpoint(s) configured", config.endpoints.len());

    let tls = config.tls.build().context("building daemon tls configuration")?;
    let daemons = RpcDaemonClients::new(
        tls,
        &config.endpoints,
        config.rpc_timeout(),
        config.operation_timeout(),
    )?;
    let machines = MachineService::new(
        Arc::new(AzureMachineControl::new(config.azure.clone())),
        &config.endpoints,
        config.rpc_timeout(),
        config.operation_timeout(),
    );

    let hub = Arc::new(StatusHub::new());
    let monitor = Arc::new(Monitor::new(
        config.endpoints.iter().map(|e| e.name.clone()).collect(),
        Arc::new(machines),
        Arc::new(daemons),
        hub.clone(),
        Thresholds::from_minutes(
            config.idle_server_shutdown_interval,
            config.server_power_off_interval,
            config.server_deallocate_interval,
        ),
    ));

    let mut gs = GracefulShutdown::new(Shutdown::new());
    gs.add_driver(PollDriver::new(
        monitor.clone(),
        config.refresh_interval(),
        config.operation_timeout(),
    ));
    gs.add_driver(HttpDriver::new(config.http.addr(), monitor, hub));

    gs.watch().await?;
    info!("Bye.");
    Ok(())
}
