use super::{MachineControl, MachineId, MachinePowerState, ProviderError};
use crate::config::EndpointConfig;
use crate::error::FleetError;
use log::{error, info, warn};
use mcfleet_protocol::management::server::OperationOutcome;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Resolves endpoint names to machines and bounds every provider call.
pub struct MachineService {
    control: Arc<dyn MachineControl>,
    machines: HashMap<String, MachineId>,
    query_timeout: Duration,
    operation_timeout: Duration,
}

impl MachineService {
    pub fn new(
        control: Arc<dyn MachineControl>,
        endpoints: &[EndpointConfig],
        query_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        let machines = endpoints
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    MachineId {
                        resource_group: e.resource_group.clone(),
                        machine_name: e.machine_name.clone(),
                    },
                )
            })
            .collect();
        Self {
            control,
            machines,
            query_timeout,
            operation_timeout,
        }
    }

    fn machine(&self, name: &str) -> Result<&MachineId, FleetError> {
        self.machines
            .get(name)
            .ok_or_else(|| FleetError::UnknownEndpoint(name.to_string()))
    }

    async fn bounded<T>(
        timeout: Duration,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ProviderError::Unreachable(format!("no answer within {:?}", timeout)))?
    }

    /// Provider failures become `NetworkError` or `LocalError`; only an
    /// unknown name or an unsupported state code is an error.
    pub async fn power_state(&self, name: &str) -> Result<MachinePowerState, FleetError> {
        let machine = self.machine(name)?;
        match Self::bounded(self.query_timeout, self.control.power_state(machine)).await {
            Ok(code) => MachinePowerState::from_provider_code(name, code.as_deref()),
            Err(err @ ProviderError::Malformed(_)) => {
                warn!("power state of {} ({}): {}", name, machine, err);
                Ok(MachinePowerState::LocalError)
            }
            Err(err) => {
                warn!("power state of {} ({}): {}", name, machine, err);
                Ok(MachinePowerState::NetworkError)
            }
        }
    }

    pub async fn start(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        let machine = self.machine(name)?;
        info!("starting machine of {} ({})", name, machine);
        let result = Self::bounded(self.operation_timeout, self.control.start(machine)).await;
        Ok(Self::outcome(name, "start", result))
    }

    pub async fn power_off(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        let machine = self.machine(name)?;
        info!("powering off machine of {} ({})", name, machine);
        let result = Self::bounded(self.operation_timeout, self.control.power_off(machine)).await;
        Ok(Self::outcome(name, "power off", result))
    }

    pub async fn deallocate(&self, name: &str) -> Result<OperationOutcome, FleetError> {
        let machine = self.machine(name)?;
        info!("deallocating machine of {} ({})", name, machine);
        let result = Self::bounded(self.operation_timeout, self.control.deallocate(machine)).await;
        Ok(Self::outcome(name, "deallocate", result))
    }

    fn outcome(name: &str, what: &str, result: Result<(), ProviderError>) -> OperationOutcome {
        match result {
            Ok(()) => OperationOutcome::completed(),
            Err(err) => {
                error!("{} machine of {} failed: {}", what, name, err);
                OperationOutcome::failed(err.to_string())
            }
        }
    }
}
