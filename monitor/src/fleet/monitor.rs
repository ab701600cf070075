use super::clock::ActivityClock;
use super::decision::{decide, FleetAction, Thresholds};
use super::publisher::StatusPublisher;
use super::status::{EndpointStatus, MachineStatus, ServerStatusReport, Snapshot};
use crate::daemon::{ServerDaemon, ServerStatus};
use crate::error::{FleetError, RpcError};
use crate::machine::{MachinePowerState, MachineService};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use mcfleet_protocol::management::server::{OperationOutcome, ServerOperation};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rpc_outcome(name: &str, result: Result<OperationOutcome, RpcError>) -> OperationOutcome {
    result.unwrap_or_else(|err| {
        warn!("{}: {}", name, err);
        OperationOutcome::failed(err.to_string())
    })
}

/// Watches every endpoint and walks idle ones down the shutdown cascade.
///
/// Only the poll cycle mutates fleet state. Readers get the snapshot of the
/// last completed poll and never wait for a running one.
pub struct Monitor {
    names: Vec<String>,
    machines: Arc<MachineService>,
    daemons: Arc<dyn ServerDaemon>,
    publisher: Arc<dyn StatusPublisher>,
    thresholds: Thresholds,
    snapshot: RwLock<Snapshot>,
    // held for a whole poll, so polls never overlap
    clocks: tokio::sync::Mutex<HashMap<String, ActivityClock>>,
    actions: Mutex<JoinSet<()>>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl Monitor {
    pub fn new(
        names: Vec<String>,
        machines: Arc<MachineService>,
        daemons: Arc<dyn ServerDaemon>,
        publisher: Arc<dyn StatusPublisher>,
        thresholds: Thresholds,
    ) -> Self {
        let now = Utc::now();
        let seeded = names
            .iter()
            .map(|name| EndpointStatus::unobserved(name, now))
            .collect();
        Self {
            names,
            machines,
            daemons,
            publisher,
            thresholds,
            snapshot: RwLock::new(Arc::new(seeded)),
            clocks: tokio::sync::Mutex::new(HashMap::new()),
            actions: Mutex::new(JoinSet::new()),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn poll_once(&self) -> Result<Snapshot, FleetError> {
        self.poll_once_at(Utc::now()).await
    }

    /// One full cycle: observe every endpoint concurrently, swap the
    /// snapshot, advance the clocks, dispatch due actions, publish.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> Result<Snapshot, FleetError> {
        let mut clocks = self.clocks.lock().await;
        self.reap_actions();

        let observed = join_all(self.names.iter().map(|name| self.observe(name, now))).await;
        let snapshot: Snapshot = Arc::new(observed.into_iter().collect::<Result<Vec<_>, _>>()?);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

        for status in snapshot.iter() {
            let clock = clocks.entry(status.name.clone()).or_default();
            *clock = clock.advance(status, now);
            if let Some(action) = decide(clock, status, now, &self.thresholds) {
                self.dispatch(&status.name, action);
            }
        }
        drop(clocks);

        self.publisher.publish_snapshot(snapshot.clone()).await;
        Ok(snapshot)
    }

    // unknown endpoints are the only rpc failure that is not a status
    fn fold<T>(name: &str, result: Result<T, RpcError>) -> Result<Option<T>, FleetError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(RpcError::UnknownEndpoint(name)) => Err(FleetError::UnknownEndpoint(name)),
            Err(err) => {
                warn!("{}: {}", name, err);
                Ok(None)
            }
        }
    }

    async fn observe(&self, name: &str, now: DateTime<Utc>) -> Result<EndpointStatus, FleetError> {
        let power_state = self.machines.power_state(name).await?;
        let mut server = ServerStatusReport {
            status: if power_state.is_error() {
                ServerStatus::LocalError
            } else {
                ServerStatus::Stopped
            },
            online: 0,
            max: 0,
            players: vec![],
            timestamp: now,
        };

        if power_state == MachinePowerState::Running {
            server.status = Self::fold(name, self.daemons.get_status(name).await)?
                .map_or(ServerStatus::NetworkError, ServerStatus::from);
        }
        if server.status == ServerStatus::Running {
            match Self::fold(name, self.daemons.list_users(name).await)? {
                Some(players) => {
                    server.online = players.online;
                    server.max = players.max;
                    server.players = players.users;
                }
                None => server.status = ServerStatus::NetworkError,
            }
        }

        debug!(
            "{}: machine {}, server {} ({}/{})",
            name, power_state, server.status, server.online, server.max
        );
        Ok(EndpointStatus {
            name: name.to_string(),
            machine: MachineStatus {
                power_state,
                timestamp: now,
            },
            server,
        })
    }

    fn reap_actions(&self) {
        let mut actions = lock(&self.actions);
        while let Some(joined) = actions.try_join_next() {
            if let Err(err) = joined {
                warn!("fleet action task failed: {}", err);
            }
        }
    }

    // runs detached; one action per endpoint at a time
    fn dispatch(&self, name: &str, action: FleetAction) {
        if !lock(&self.pending).insert(name.to_string()) {
            debug!("{}: {} deferred, previous action still running", name, action);
            return;
        }
        info!("{}: {}", name, action);

        let machines = self.machines.clone();
        let daemons = self.daemons.clone();
        let pending = self.pending.clone();
        let name = name.to_string();
        lock(&self.actions).spawn(async move {
            let outcome = match action {
                FleetAction::StopServer => {
                    rpc_outcome(&name, daemons.operation(&name, ServerOperation::Stop).await)
                }
                FleetAction::PowerOffMachine => machines
                    .power_off(&name)
                    .await
                    .unwrap_or_else(|err| OperationOutcome::failed(err.to_string())),
                FleetAction::DeallocateMachine => machines
                    .deallocate(&name)
                    .await
                    .unwrap_or_else(|err| OperationOutcome::failed(err.to_string())),
            };
            match &outcome.error {
                None if outcome.completed => info!("{}: {} done", name, action),
                error => warn!("{}: {} failed: {}", name, action, error.as_deref().unwrap_or("not completed")),
            }
            lock(&pending).remove(&name);
        });
    }

    /// Waits for detached actions; whatever is left after `timeout` is
    /// aborted and no longer blocks its endpoint. Returns whether everything
    /// finished.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let mut actions = std::mem::take(&mut *lock(&self.actions));
        let drained = tokio::time::timeout(timeout, async {
            while actions.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!("abandoning {} unfinished fleet action(s)", actions.len());
            actions.abort_all();
            lock(&self.pending).clear();
        }
        drained
    }
}

// status queries, answered from the last completed poll
impl Monitor {
    pub fn endpoint_names(&self) -> &[String] {
        &self.names
    }

    pub fn all_cached_statuses(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cached_endpoint(&self, name: &str) -> Result<EndpointStatus, FleetError> {
        self.all_cached_statuses()
            .iter()
            .find(|status| status.name == name)
            .cloned()
            .ok_or_else(|| FleetError::UnknownEndpoint(name.to_string()))
    }

    pub fn cached_server_status(&self, name: &str) -> Result<ServerStatusReport, FleetError> {
        self.cached_endpoint(name).map(|status| status.server)
    }

    pub fn cached_machine_status(&self, name: &str) -> Result<MachineStatus, FleetError> {
        self.cached_endpoint(name).map(|status| status.machine)
    }
}

// commands from outside the poll cycle
impl Monitor {
    fn ensure_known(&self, name: &str) -> Result<(), FleetError> {
        if self.names.iter().any(|n| n == name) {
            Ok(())
        } else {
            Err(FleetError::UnknownEndpoint(name.to_string()))
        }
    }

    pub async fn start_machine(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        self.ensure_known(name)?;
        self.machines.start(name).await
    }

    pub async fn start_server(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        self.server_operation(name, ServerOperation::Start).await
    }

    pub async fn stop_server(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        self.server_operation(name, ServerOperation::Stop).await
    }

    async fn server_operation(
        &self,
        name: &str,
        operation: ServerOperation,
    ) -> Result<OperationOutcome, FleetError> {
        self.ensure_known(name)?;
        info!("{}: {} server requested", name, operation);
        Ok(rpc_outcome(name, self.daemons.operation(name, operation).await))
    }
}
