//! Secured request/response channel between the control plane and a daemon.
//!
//! One websocket connection over TLS carries JSON-encoded [`ActionRequest`]s
//! and [`ActionResponse`]s, one per text message.
//!
//! [`ActionRequest`]: crate::v1::action::ActionRequest
//! [`ActionResponse`]: crate::v1::action::ActionResponse

mod error;
mod tls;
mod ws;

pub use error::TransportError;
pub use tls::{
    load_certificates, load_private_key, load_root_store, server_config, ClientAuth,
    ClientTlsConfig,
};
pub use ws::{accept, RpcConnector, RPC_PATH};
