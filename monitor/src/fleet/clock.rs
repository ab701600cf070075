use super::status::EndpointStatus;
use crate::daemon::ServerStatus;
use crate::machine::MachinePowerState;
use chrono::{DateTime, Utc};

/// When each tier was first seen inactive; `None` while it is active or
/// the tier does not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityClock {
    pub player_idle_since: Option<DateTime<Utc>>,
    pub server_stopped_since: Option<DateTime<Utc>>,
    pub machine_inactive_since: Option<DateTime<Utc>>,
}

impl ActivityClock {
    /// Folds one observation into the clock.
    ///
    /// Error states freeze the timers they gate: a machine error freezes all
    /// three, a server error the two server tiers.
    pub fn advance(self, status: &EndpointStatus, now: DateTime<Utc>) -> Self {
        let machine = status.machine.power_state;
        if machine.is_error() {
            return self;
        }

        if machine != MachinePowerState::Running {
            return Self {
                player_idle_since: None,
                server_stopped_since: None,
                machine_inactive_since: self.machine_inactive_since.or(Some(now)),
            };
        }

        let mut next = Self {
            machine_inactive_since: None,
            ..self
        };
        match status.server.status {
            ServerStatus::Running => {
                next.server_stopped_since = None;
                next.player_idle_since = if status.server.online > 0 {
                    None
                } else {
                    self.player_idle_since.or(Some(now))
                };
            }
            ServerStatus::Stopped => {
                next.server_stopped_since = self.server_stopped_since.or(Some(now));
                next.player_idle_since = self.player_idle_since.or(Some(now));
            }
            ServerStatus::NetworkError | ServerStatus::LocalError | ServerStatus::Error => {}
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::status::{MachineStatus, ServerStatusReport};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn status(machine: MachinePowerState, server: ServerStatus, online: u32) -> EndpointStatus {
        EndpointStatus {
            name: "a".into(),
            machine: MachineStatus {
                power_state: machine,
                timestamp: at(0),
            },
            server: ServerStatusReport {
                status: server,
                online,
                max: 10,
                players: vec![],
                timestamp: at(0),
            },
        }
    }

    #[test]
    fn players_reset_idle_timer() {
        let clock = ActivityClock {
            player_idle_since: Some(at(1)),
            ..Default::default()
        };
        let next = clock.advance(
            &status(MachinePowerState::Running, ServerStatus::Running, 3),
            at(5),
        );
        assert_eq!(next, ActivityClock::default());
    }

    #[test]
    fn idle_timer_keeps_first_sighting() {
        let running_empty = status(MachinePowerState::Running, ServerStatus::Running, 0);
        let clock = ActivityClock::default()
            .advance(&running_empty, at(1))
            .advance(&running_empty, at(2));
        assert_eq!(clock.player_idle_since, Some(at(1)));
        assert_eq!(clock.server_stopped_since, None);
    }

    #[test]
    fn stopped_server_counts_for_two_tiers() {
        let clock = ActivityClock::default().advance(
            &status(MachinePowerState::Running, ServerStatus::Stopped, 0),
            at(3),
        );
        assert_eq!(
            clock,
            ActivityClock {
                player_idle_since: Some(at(3)),
                server_stopped_since: Some(at(3)),
                machine_inactive_since: None,
            }
        );
    }

    #[test]
    fn machine_error_freezes_everything() {
        let clock = ActivityClock {
            player_idle_since: Some(at(1)),
            server_stopped_since: Some(at(2)),
            machine_inactive_since: None,
        };
        for state in [
            MachinePowerState::NetworkError,
            MachinePowerState::LocalError,
            MachinePowerState::Error,
        ] {
            assert_eq!(
                clock.advance(&status(state, ServerStatus::LocalError, 0), at(9)),
                clock
            );
        }
    }

    #[test]
    fn server_error_freezes_server_tiers_only() {
        let clock = ActivityClock {
            player_idle_since: Some(at(1)),
            server_stopped_since: None,
            machine_inactive_since: Some(at(0)),
        };
        let next = clock.advance(
            &status(MachinePowerState::Running, ServerStatus::NetworkError, 0),
            at(4),
        );
        assert_eq!(next.player_idle_since, Some(at(1)));
        assert_eq!(next.server_stopped_since, None);
        assert_eq!(next.machine_inactive_since, None);
    }

    #[test]
    fn machine_down_resets_server_tiers() {
        let clock = ActivityClock {
            player_idle_since: Some(at(1)),
            server_stopped_since: Some(at(2)),
            machine_inactive_since: None,
        };
        let next = clock.advance(
            &status(MachinePowerState::Stopped, ServerStatus::Stopped, 0),
            at(7),
        );
        assert_eq!(
            next,
            ActivityClock {
                player_idle_since: None,
                server_stopped_since: None,
                machine_inactive_since: Some(at(7)),
            }
        );
    }
}
