use crate::management::server::{
    OnlinePlayers, OperationOutcome, PublicServerStatus, ServerOperation,
};
use crate::v1::action::retcode::Retcode;
use crate::v1::action::status::ActionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum ActionParameters {
    // misc
    Ping {},
    GetOutput {
        #[serde(default)]
        limit: Option<usize>,
    },

    // server control
    GetStatus {},
    ListUsers {},
    Operation {
        operation: ServerOperation,
    },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "action", content = "result", rename_all = "snake_case")]
pub enum ActionResults {
    ActionError {},

    // misc
    Ping { time: u64 },
    GetOutput { lines: Vec<String> },

    // server control
    GetStatus { status: PublicServerStatus },
    ListUsers(OnlinePlayers),
    Operation(OperationOutcome),
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ActionRequest {
    #[serde(flatten)]
    pub parameters: ActionParameters, // flattened
    pub id: Uuid,
}

impl ActionRequest {
    pub fn new(parameters: ActionParameters) -> Self {
        Self {
            parameters,
            id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ActionResponse {
    pub status: ActionStatus,
    pub data: ActionResults,
    #[serde(flatten)]
    pub retcode: Retcode,
    pub id: Uuid,
}
