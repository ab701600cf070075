use super::output::{OutputHistory, PlayerTracker};
use super::process::{self, ProcessHandle, ProcessObserver};
use super::status::{ServerCommand, ServerProcessState};
use crate::config::ServerSettings;
use log::{debug, error, info, warn};
use mcfleet_protocol::management::server::{OnlinePlayers, PublicServerStatus};
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

// grace period for a killed process to be reaped
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("server is {0:?}")]
    BadState(ServerProcessState),
    #[error("could not launch server: {0}")]
    Launch(#[source] io::Error),
    #[error("could not write to server console: {0}")]
    Console(#[source] io::Error),
}

/// How [`Supervisor::stop_or_kill`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The server exited on its own after `stop`.
    Exited,
    /// The server ignored `stop` and was killed.
    Killed,
    /// Even the kill did not bring the process down.
    Stuck,
}

struct Slot {
    state: ServerProcessState,
    process: Option<Arc<ProcessHandle>>,
    // bumped on every start so a late exit of an old process is ignored
    generation: u64,
}

struct Shared {
    settings: ServerSettings,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<ServerProcessState>,
    players: PlayerTracker,
    history: OutputHistory,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, slot: &mut Slot, state: ServerProcessState) {
        if slot.state != state {
            debug!("server state {:?} -> {:?}", slot.state, state);
        }
        slot.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Owns the lifecycle of the one game server process next to this daemon.
///
/// The slot lock is only held while a transition is decided; console writes
/// and exit waits happen after it is released.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Generation {
    shared: Arc<Shared>,
    generation: u64,
}

impl ProcessObserver for Generation {
    fn on_stdout(&self, line: String) {
        info!("[stdout] {}", line);
        self.shared.players.observe(&line);
        self.shared.history.push(line);
    }

    fn on_stderr(&self, line: String) {
        error!("[stderr] {}", line);
        self.shared.history.push(format!("[STDERR] {}", line));
    }

    fn on_exited(&self, status: io::Result<ExitStatus>) {
        match status {
            Ok(status) => info!("server process exited with {}", status),
            Err(err) => warn!("could not collect server exit status: {}", err),
        }

        let mut slot = self.shared.lock();
        if slot.generation != self.generation {
            return;
        }
        slot.process = None;
        self.shared.set_state(&mut slot, ServerProcessState::Stopped);
    }
}

impl Supervisor {
    pub fn new(settings: ServerSettings) -> Self {
        let (state_tx, _) = watch::channel(ServerProcessState::Stopped);
        let history = OutputHistory::new(settings.output_history);
        Self {
            shared: Arc::new(Shared {
                settings,
                slot: Mutex::new(Slot {
                    state: ServerProcessState::Stopped,
                    process: None,
                    generation: 0,
                }),
                state_tx,
                players: PlayerTracker::default(),
                history,
            }),
        }
    }

    pub fn state(&self) -> ServerProcessState {
        self.shared.lock().state
    }

    pub fn public_status(&self) -> PublicServerStatus {
        self.state().into()
    }

    pub fn players(&self) -> OnlinePlayers {
        self.shared.players.snapshot()
    }

    pub fn output(&self, limit: Option<usize>) -> Vec<String> {
        self.shared.history.tail(limit)
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().process.as_ref().and_then(|p| p.pid())
    }

    /// Launches the server. Returns `Ok(false)` without doing anything
    /// unless the server is stopped.
    pub fn start(&self) -> Result<bool, SupervisorError> {
        let generation = {
            let mut slot = self.shared.lock();
            if slot.state != ServerProcessState::Stopped {
                debug!("start ignored, server is {:?}", slot.state);
                return Ok(false);
            }
            slot.generation += 1;
            self.shared.set_state(&mut slot, ServerProcessState::Starting);
            slot.generation
        };

        self.shared.history.clear();
        self.shared.players.reset();

        let settings = &self.shared.settings;
        info!(
            "starting server {} in {}",
            settings.executable_path().display(),
            settings.directory.display()
        );
        let (handle, pipes) = match process::spawn(settings) {
            Ok(spawned) => spawned,
            Err(err) => {
                error!("could not launch server: {}", err);
                let mut slot = self.shared.lock();
                self.shared.set_state(&mut slot, ServerProcessState::Error);
                return Err(SupervisorError::Launch(err));
            }
        };

        let handle = Arc::new(handle);
        {
            let mut slot = self.shared.lock();
            slot.process = Some(handle.clone());
            self.shared.set_state(&mut slot, ServerProcessState::Running);
        }
        info!("server started (pid={:?})", handle.pid());

        let observer = Generation {
            shared: self.shared.clone(),
            generation,
        };
        tokio::spawn(async move {
            process::supervise(pipes, &handle, &observer).await;
        });
        self.spawn_list_timer(generation);
        Ok(true)
    }

    /// Writes `command` to the console. Only accepted while running; success
    /// means the line was written, not that the server acted on it.
    pub async fn execute_command(&self, command: ServerCommand) -> Result<(), SupervisorError> {
        let handle = {
            let slot = self.shared.lock();
            match (&slot.process, slot.state) {
                (Some(handle), ServerProcessState::Running) => handle.clone(),
                (_, state) => return Err(SupervisorError::BadState(state)),
            }
        };
        handle
            .write_line(command.as_line())
            .await
            .map_err(SupervisorError::Console)
    }

    /// Returns whether a stop was initiated; a no-op unless running.
    ///
    /// A graceful stop types `stop` into the console and leaves the rest to
    /// the exit of the process.
    pub async fn stop(&self, graceful: bool) -> bool {
        let handle = {
            let mut slot = self.shared.lock();
            let handle = match (&slot.process, slot.state) {
                (Some(handle), ServerProcessState::Running) => handle.clone(),
                (_, state) => {
                    debug!("stop ignored, server is {:?}", state);
                    return false;
                }
            };
            self.shared.set_state(&mut slot, ServerProcessState::Stopping);
            handle
        };

        if !graceful {
            info!("killing server (pid={:?})", handle.pid());
            handle.kill();
            return true;
        }

        info!("stopping server (pid={:?})", handle.pid());
        if let Err(err) = handle.write_line(ServerCommand::Stop.as_line()).await {
            warn!("could not send stop to server, killing it: {}", err);
            handle.kill();
        }
        true
    }

    /// Forcibly terminates a running or stopping server.
    pub fn kill(&self) -> bool {
        let mut slot = self.shared.lock();
        let handle = match (&slot.process, slot.state) {
            (Some(handle), ServerProcessState::Running | ServerProcessState::Stopping) => {
                handle.clone()
            }
            _ => return false,
        };
        self.shared.set_state(&mut slot, ServerProcessState::Stopping);
        warn!("killing server (pid={:?})", handle.pid());
        handle.kill();
        true
    }

    /// Waits for a stopping server to exit. Returns whether it is stopped
    /// when the wait ends.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut state_rx = self.shared.state_tx.subscribe();
        match *state_rx.borrow_and_update() {
            ServerProcessState::Stopped => return true,
            ServerProcessState::Stopping => {}
            state => {
                debug!("wait for exit ignored, server is {:?}", state);
                return false;
            }
        }

        let waited = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| *state != ServerProcessState::Stopping),
        )
        .await;
        match waited {
            Ok(Ok(state)) => *state == ServerProcessState::Stopped,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("server did not exit within {:?}", timeout);
                false
            }
        }
    }

    /// Graceful stop bounded by `timeout`, escalated to a kill. Also takes
    /// over a stop that is already under way.
    pub async fn stop_or_kill(&self, timeout: Duration) -> StopOutcome {
        if !self.stop(true).await && self.state() != ServerProcessState::Stopping {
            return StopOutcome::NotRunning;
        }
        if self.wait_for_exit(timeout).await {
            return StopOutcome::Exited;
        }

        warn!("server did not stop within {:?}, killing it", timeout);
        self.kill();
        if self.wait_for_exit(KILL_TIMEOUT).await {
            StopOutcome::Killed
        } else {
            error!("server process did not exit after kill");
            StopOutcome::Stuck
        }
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }

    // keeps player counts fresh even when nobody polls the daemon
    fn spawn_list_timer(&self, generation: u64) {
        let supervisor = self.clone();
        let period = self.shared.settings.list_interval();
        let mut state_rx = self.shared.state_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    _ = ticker.tick() => {
                        if !supervisor.is_generation(generation) {
                            break;
                        }
                        if supervisor.state() != ServerProcessState::Running {
                            continue;
                        }
                        if let Err(err) = supervisor.execute_command(ServerCommand::List).await {
                            debug!("list skipped: {}", err);
                        }
                    }
                    _ = stopped(&mut state_rx) => break,
                }
            }
            debug!("list timer of generation {} finished", generation);
        });
    }
}

async fn stopped(state_rx: &mut watch::Receiver<ServerProcessState>) {
    let _ = state_rx
        .wait_for(|state| *state == ServerProcessState::Stopped)
        .await;
}
