use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Retcode {
    #[serde(rename = "retcode")]
    ret_code: i32,
    message: String,
}

impl Retcode {
    pub fn with_message(&self, msg: &str) -> Retcode {
        Retcode {
            ret_code: self.ret_code,
            message: format!("{}: {}", self.message, msg),
        }
    }

    pub fn code(&self) -> i32 {
        self.ret_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

lazy_static! {
    pub static ref OK: Retcode = Retcode {
        ret_code: 0,
        message: "ok".to_string(),
    };
    // Request Errors (10000-19999)
    pub static ref BAD_REQUEST: Retcode = Retcode {
        ret_code: 10001,
        message: "Bad Request".to_string(),
    };

    // Server Errors (30000-39999)
    pub static ref BAD_SERVER_STATE: Retcode = Retcode {
        ret_code: 30003,
        message: "Bad Server State".to_string(),
    };

    // Server Operation Errors
    pub static ref OPERATION_TIMEOUT: Retcode = Retcode {
        ret_code: 31001,
        message: "Operation Timeout".to_string(),
    };
    pub static ref PROCESS_ERROR: Retcode = Retcode {
        ret_code: 31003,
        message: "Process Error".to_string(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn with_message_keeps_code() {
        let rc = PROCESS_ERROR.with_message("launch failed");
        assert_eq!(rc.code(), 31003);
        assert_eq!(rc.message(), "Process Error: launch failed");
        assert_eq!(OK.code(), 0);
    }
}
