use crate::fleet::Monitor;
use log::{debug, info, warn};
use mcfleet_protocol::utils::{Driver, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{interval, MissedTickBehavior};

/// Drives the poll cycle of the monitor at a fixed interval.
pub struct PollDriver {
    monitor: Arc<Monitor>,
    interval: Duration,
    settle_timeout: Duration,
}

impl PollDriver {
    pub fn new(monitor: Arc<Monitor>, interval: Duration, settle_timeout: Duration) -> Self {
        Self {
            monitor,
            interval,
            settle_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Driver for PollDriver {
    async fn run(&self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let mut ticker = interval(self.interval);
        // a slow cycle pushes the next one back instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "polling {} endpoint(s) every {:?}",
            self.monitor.endpoint_names().len(),
            self.interval
        );

        let result = loop {
            select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break Ok(()),
            }
            select! {
                result = self.monitor.poll_once() => match result {
                    Ok(snapshot) => debug!("poll cycle done, {} endpoint(s)", snapshot.len()),
                    Err(err) => break Err(anyhow::Error::new(err).context("poll cycle failed")),
                },
                _ = shutdown.wait() => {
                    warn!("shutdown during a poll cycle, abandoning it");
                    break Ok(());
                }
            }
        };

        if !self.monitor.settle(self.settle_timeout).await {
            warn!("some fleet actions did not finish within {:?}", self.settle_timeout);
        }
        result
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::monitor_tests::fixture;
    use crate::fleet::Thresholds;
    use mcfleet_protocol::management::server::PublicServerStatus;
    use mcfleet_protocol::utils::Shutdown;

    #[tokio::test]
    async fn polls_until_shutdown() {
        let f = fixture(&["a"], Thresholds::from_minutes(10, 10, 10));
        f.machines.set("vm-a", Some("PowerState/running"));
        f.daemons.set("a", PublicServerStatus::Running, 1);
        let monitor = Arc::new(f.monitor);

        let shutdown = Shutdown::new();
        let driver = PollDriver::new(
            monitor.clone(),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );
        let task = tokio::spawn({
            let signal = shutdown.subscribe();
            async move { driver.run(signal).await }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();

        assert!(f.publisher.snapshots.lock().unwrap().len() >= 2);
        assert_eq!(monitor.cached_server_status("a").unwrap().online, 1);
    }

    #[tokio::test]
    async fn unsupported_power_state_stops_the_driver() {
        let f = fixture(&["a"], Thresholds::from_minutes(10, 10, 10));
        f.machines.set("vm-a", Some("PowerState/sleeping"));
        let driver = PollDriver::new(
            Arc::new(f.monitor),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );

        let shutdown = Shutdown::new();
        let result = driver.run(shutdown.subscribe()).await;
        assert!(result.is_err());
    }
}
