use super::clock::ActivityClock;
use super::status::EndpointStatus;
use crate::daemon::ServerStatus;
use crate::machine::MachinePowerState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// How long each tier may stay inactive before it is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub idle_server_shutdown: Duration,
    pub server_power_off: Duration,
    pub server_deallocate: Duration,
}

impl Thresholds {
    pub fn from_minutes(idle: u64, power_off: u64, deallocate: u64) -> Self {
        Self {
            idle_server_shutdown: Duration::from_secs(idle * 60),
            server_power_off: Duration::from_secs(power_off * 60),
            server_deallocate: Duration::from_secs(deallocate * 60),
        }
    }
}

/// A step down the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetAction {
    StopServer,
    PowerOffMachine,
    DeallocateMachine,
}

impl fmt::Display for FleetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FleetAction::StopServer => "stop server",
            FleetAction::PowerOffMachine => "power off machine",
            FleetAction::DeallocateMachine => "deallocate machine",
        })
    }
}

fn expired(since: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match since {
        Some(since) => (now - since).to_std().is_ok_and(|elapsed| elapsed >= threshold),
        None => false,
    }
}

/// Picks the action an endpoint is due for, if any. The tier preconditions
/// exclude each other, so there is at most one.
pub fn decide(
    clock: &ActivityClock,
    status: &EndpointStatus,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Option<FleetAction> {
    let machine = status.machine.power_state;
    if machine.is_error() {
        return None;
    }

    if machine == MachinePowerState::Running {
        let server = status.server.status;
        if server.is_error() {
            return None;
        }
        if server == ServerStatus::Running
            && expired(clock.player_idle_since, now, thresholds.idle_server_shutdown)
        {
            return Some(FleetAction::StopServer);
        }
        if server == ServerStatus::Stopped
            && expired(clock.server_stopped_since, now, thresholds.server_power_off)
        {
            return Some(FleetAction::PowerOffMachine);
        }
        return None;
    }

    // deallocating or deallocated machines must not be hit again
    if machine == MachinePowerState::Stopped
        && expired(clock.machine_inactive_since, now, thresholds.server_deallocate)
    {
        return Some(FleetAction::DeallocateMachine);
    }
    None
}
