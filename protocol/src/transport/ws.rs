use super::TransportError;
use crate::v1::action::{ActionRequest, ActionResponse};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{server, TlsAcceptor, TlsConnector};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const RPC_PATH: &str = "/api/v1";

/// Server half: TLS handshake then websocket upgrade, both bounded by `timeout`.
pub async fn accept(
    config: Arc<ServerConfig>,
    stream: TcpStream,
    timeout: Duration,
) -> Result<WebSocketStream<server::TlsStream<TcpStream>>, TransportError> {
    let handshake = async move {
        let tls = TlsAcceptor::from(config).accept(stream).await?;
        let ws = tokio_tungstenite::accept_async(tls).await?;
        Ok::<_, TransportError>(ws)
    };
    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

/// Client half. Every call opens its own connection, sends one request and
/// waits for the matching response.
#[derive(Clone)]
pub struct RpcConnector {
    connector: TlsConnector,
}

impl RpcConnector {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
        }
    }

    pub async fn call(
        &self,
        addr: &str,
        server_name: &ServerName<'static>,
        request: &ActionRequest,
        timeout: Duration,
    ) -> Result<ActionResponse, TransportError> {
        tokio::time::timeout(timeout, self.exchange(addr, server_name, request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn exchange(
        &self,
        addr: &str,
        server_name: &ServerName<'static>,
        request: &ActionRequest,
    ) -> Result<ActionResponse, TransportError> {
        let tcp = TcpStream::connect(addr).await?;
        let tls = self.connector.connect(server_name.clone(), tcp).await?;
        let (mut ws, _) =
            tokio_tungstenite::client_async(format!("wss://{}{}", addr, RPC_PATH), tls).await?;

        ws.send(Message::Text(serde_json::to_string(request)?))
            .await?;

        let response: ActionResponse = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str(&text)?,
                Some(Ok(Message::Binary(bin))) => break serde_json::from_slice(&bin)?,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        };
        let _ = ws.close(None).await;

        if response.id != request.id {
            return Err(TransportError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientTlsConfig;
    use crate::v1::action::ActionParameters;

    #[tokio::test]
    async fn unreachable_daemon_is_an_error() {
        let config = ClientTlsConfig::Insecure {
            client_certificate: None,
            client_key: None,
        }
        .build()
        .unwrap();
        let connector = RpcConnector::new(config);

        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let name = ServerName::try_from("localhost").unwrap();
        let request = ActionRequest::new(ActionParameters::GetStatus {});
        let result = connector
            .call(&addr, &name, &request, Duration::from_secs(2))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::Io(_)) | Err(TransportError::Timeout(_))
        ));
    }
}
