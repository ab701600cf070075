use crate::management::{StopOutcome, Supervisor};
use log::{error, info};
use mcfleet_protocol::utils::{Driver, ShutdownSignal};
use std::time::Duration;

/// Boots the server with the daemon and takes it down with it.
pub struct LifecycleDriver {
    supervisor: Supervisor,
    autostart: bool,
    stop_timeout: Duration,
}

impl LifecycleDriver {
    pub fn new(supervisor: Supervisor, autostart: bool, stop_timeout: Duration) -> Self {
        Self {
            supervisor,
            autostart,
            stop_timeout,
        }
    }

    async fn shutdown_server(&self) {
        if let Some(pid) = self.supervisor.pid() {
            info!("daemon shutting down, stopping server (pid={})", pid);
        }
        match self.supervisor.stop_or_kill(self.stop_timeout).await {
            StopOutcome::Exited | StopOutcome::Killed => info!("server stopped"),
            StopOutcome::NotRunning | StopOutcome::Stuck => {}
        }
    }
}

#[async_trait::async_trait]
impl Driver for LifecycleDriver {
    async fn run(&self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        if self.autostart {
            // a launch failure leaves the supervisor in Error for the monitor to see
            if let Err(err) = self.supervisor.start() {
                error!("autostart failed: {}", err);
            }
        }

        shutdown.wait().await;
        self.shutdown_server().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "lifecycle"
    }
}
