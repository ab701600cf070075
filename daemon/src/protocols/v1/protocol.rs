use super::super::Protocol;
use crate::management::{ServerProcessState, StopOutcome, Supervisor};
use log::{error, info, warn};
use mcfleet_protocol::management::server::{OperationOutcome, ServerOperation};
use mcfleet_protocol::v1::action::retcode::{self, Retcode};
use mcfleet_protocol::v1::action::status::ActionStatus;
use mcfleet_protocol::v1::action::{
    ActionParameters, ActionRequest, ActionResponse, ActionResults,
};
use std::time::Duration;
use uuid::Uuid;

type HandlerResult = Result<ActionResults, Retcode>;

pub struct ProtocolV1 {
    supervisor: Supervisor,
    stop_timeout: Duration,
}

impl Protocol for ProtocolV1 {
    async fn process_text(&self, raw: &str) -> Option<String> {
        let request = serde_json::from_str::<ActionRequest>(raw);
        Self::encode(self.process(request).await)
    }

    async fn process_binary(&self, raw: &[u8]) -> Option<String> {
        let request = serde_json::from_slice::<ActionRequest>(raw);
        Self::encode(self.process(request).await)
    }
}

impl ProtocolV1 {
    pub fn new(supervisor: Supervisor, stop_timeout: Duration) -> Self {
        Self {
            supervisor,
            stop_timeout,
        }
    }

    fn encode(response: ActionResponse) -> Option<String> {
        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(err) => {
                error!("could not encode response {}: {}", response.id, err);
                None
            }
        }
    }

    async fn process(&self, request: serde_json::Result<ActionRequest>) -> ActionResponse {
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                warn!("bad request: {}", err);
                return Self::err(
                    retcode::BAD_REQUEST.with_message(&err.to_string()),
                    Uuid::nil(),
                );
            }
        };

        let response = match request.parameters {
            ActionParameters::Ping {} => Self::ping_handler(),
            ActionParameters::GetOutput { limit } => self.get_output_handler(limit),
            ActionParameters::GetStatus {} => self.get_status_handler(),
            ActionParameters::ListUsers {} => self.list_users_handler(),
            ActionParameters::Operation { operation } => self.operation_handler(operation).await,
        };

        match response {
            Ok(data) => Self::ok(data, request.id),
            Err(retcode) => {
                error!("action {} failed: {}", request.id, retcode.message());
                Self::err(retcode, request.id)
            }
        }
    }

    pub fn err(retcode: Retcode, id: Uuid) -> ActionResponse {
        ActionResponse {
            status: ActionStatus::Error,
            data: ActionResults::ActionError {},
            retcode,
            id,
        }
    }

    fn ok(data: ActionResults, id: Uuid) -> ActionResponse {
        ActionResponse {
            status: ActionStatus::Ok,
            data,
            retcode: retcode::OK.clone(),
            id,
        }
    }
}

impl ProtocolV1 {
    fn ping_handler() -> HandlerResult {
        Ok(ActionResults::Ping {
            time: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
        })
    }

    fn get_output_handler(&self, limit: Option<usize>) -> HandlerResult {
        Ok(ActionResults::GetOutput {
            lines: self.supervisor.output(limit),
        })
    }

    fn get_status_handler(&self) -> HandlerResult {
        Ok(ActionResults::GetStatus {
            status: self.supervisor.public_status(),
        })
    }

    fn list_users_handler(&self) -> HandlerResult {
        Ok(ActionResults::ListUsers(self.supervisor.players()))
    }

    async fn operation_handler(&self, operation: ServerOperation) -> HandlerResult {
        info!("operation {}", operation);
        match operation {
            ServerOperation::Start => self.start_server(),
            ServerOperation::Stop => self.stop_server().await,
        }
    }

    fn start_server(&self) -> HandlerResult {
        match self.supervisor.start() {
            Ok(_) => {}
            Err(err) => return Err(retcode::PROCESS_ERROR.with_message(&err.to_string())),
        }
        match self.supervisor.state() {
            ServerProcessState::Running | ServerProcessState::Starting => {
                Ok(ActionResults::Operation(OperationOutcome::completed()))
            }
            state => Err(retcode::BAD_SERVER_STATE.with_message(&format!("server is {:?}", state))),
        }
    }

    // replies once the process is gone; a server ignoring `stop` is killed
    async fn stop_server(&self) -> HandlerResult {
        let state = self.supervisor.state();
        if matches!(state, ServerProcessState::Error | ServerProcessState::Starting) {
            return Err(retcode::BAD_SERVER_STATE.with_message(&format!("server is {:?}", state)));
        }

        let outcome = match self.supervisor.stop_or_kill(self.stop_timeout).await {
            StopOutcome::NotRunning | StopOutcome::Exited => OperationOutcome::completed(),
            StopOutcome::Killed => OperationOutcome::failed(format!(
                "server did not stop within {:?} and was killed",
                self.stop_timeout
            )),
            StopOutcome::Stuck => {
                return Err(retcode::OPERATION_TIMEOUT.with_message(&format!(
                    "server still running after {:?} and a kill",
                    self.stop_timeout
                )))
            }
        };
        Ok(ActionResults::Operation(outcome))
    }
}
