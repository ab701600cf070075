use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("invalid server name `{0}'")]
    ServerName(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed before a reply was received")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(value: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(value))
    }
}
