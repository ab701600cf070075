use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePlayers {
    pub online: u32,
    pub max: u32,
    #[serde(default)]
    pub users: Vec<String>,
}
