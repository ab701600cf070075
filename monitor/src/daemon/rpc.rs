use super::ServerDaemon;
use crate::config::EndpointConfig;
use crate::error::RpcError;
use log::{error, warn};
use mcfleet_protocol::management::server::{
    OnlinePlayers, OperationOutcome, PublicServerStatus, ServerOperation,
};
use mcfleet_protocol::transport::RpcConnector;
use mcfleet_protocol::utils::ConfigError;
use mcfleet_protocol::v1::action::status::ActionStatus;
use mcfleet_protocol::v1::action::{ActionParameters, ActionRequest, ActionResponse, ActionResults};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct DaemonTarget {
    address: String,
    server_name: ServerName<'static>,
}

/// One rpc client per configured endpoint, sharing a TLS configuration.
pub struct RpcDaemonClients {
    connector: RpcConnector,
    targets: HashMap<String, DaemonTarget>,
    query_timeout: Duration,
    operation_timeout: Duration,
}

impl RpcDaemonClients {
    pub fn new(
        tls: Arc<ClientConfig>,
        endpoints: &[EndpointConfig],
        query_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut targets = HashMap::new();
        for endpoint in endpoints {
            targets.insert(
                endpoint.name.clone(),
                DaemonTarget {
                    address: endpoint.server_address.clone(),
                    server_name: endpoint.server_name()?,
                },
            );
        }
        Ok(Self {
            connector: RpcConnector::new(tls),
            targets,
            query_timeout,
            operation_timeout,
        })
    }

    async fn call(
        &self,
        name: &str,
        parameters: ActionParameters,
        timeout: Duration,
    ) -> Result<ActionResponse, RpcError> {
        let target = self
            .targets
            .get(name)
            .ok_or_else(|| RpcError::UnknownEndpoint(name.to_string()))?;
        let request = ActionRequest::new(parameters);

        self.connector
            .call(&target.address, &target.server_name, &request, timeout)
            .await
            .map_err(|err| {
                warn!("rpc to {} ({}) failed: {}", name, target.address, err);
                RpcError::Network {
                    endpoint: name.to_string(),
                    reason: err.to_string(),
                }
            })
    }

    fn unexpected(name: &str, response: &ActionResponse) -> RpcError {
        let reason = if response.status == ActionStatus::Error {
            format!("{} ({})", response.retcode.message(), response.retcode.code())
        } else {
            format!("unexpected answer {:?}", response.data)
        };
        error!("daemon {} answered: {}", name, reason);
        RpcError::Network {
            endpoint: name.to_string(),
            reason,
        }
    }
}

#[async_trait::async_trait]
impl ServerDaemon for RpcDaemonClients {
    async fn get_status(&self, name: &str) -> Result<PublicServerStatus, RpcError> {
        let response = self
            .call(name, ActionParameters::GetStatus {}, self.query_timeout)
            .await?;
        match response.data {
            ActionResults::GetStatus { status } => Ok(status),
            _ => Err(Self::unexpected(name, &response)),
        }
    }

    async fn list_users(&self, name: &str) -> Result<OnlinePlayers, RpcError> {
        let response = self
            .call(name, ActionParameters::ListUsers {}, self.query_timeout)
            .await?;
        match response.data {
            ActionResults::ListUsers(players) => Ok(players),
            _ => Err(Self::unexpected(name, &response)),
        }
    }

    async fn operation(
        &self,
        name: &str,
        operation: ServerOperation,
    ) -> Result<OperationOutcome, RpcError> {
        let response = self
            .call(
                name,
                ActionParameters::Operation { operation },
                self.operation_timeout,
            )
            .await?;
        match response.data {
            ActionResults::Operation(outcome) => Ok(outcome),
            _ if response.status == ActionStatus::Error => {
                error!(
                    "{} of {} refused: {}",
                    operation,
                    name,
                    response.retcode.message()
                );
                Ok(OperationOutcome::failed(response.retcode.message()))
            }
            _ => Err(Self::unexpected(name, &response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use mcfleet_protocol::transport::{self, ClientAuth, ClientTlsConfig};
    use mcfleet_protocol::v1::action::retcode;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../testdata")
            .join(name)
    }

    fn endpoint(name: &str, address: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.into(),
            server_address: address.into(),
            tls_server_name: Some("localhost".into()),
            resource_group: "rg".into(),
            machine_name: "vm".into(),
        }
    }

    // answers every request with `answer(request)`, one connection at a time
    async fn fake_daemon(
        answer: fn(ActionRequest) -> ActionResponse,
    ) -> String {
        let tls = transport::server_config(
            &testdata("daemon.pem"),
            &testdata("daemon.key"),
            ClientAuth::None,
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut ws = match transport::accept(tls.clone(), stream, Duration::from_secs(5)).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let request: ActionRequest = serde_json::from_str(&text).unwrap();
                    let response = serde_json::to_string(&answer(request)).unwrap();
                    let _ = ws.send(Message::Text(response)).await;
                }
            }
        });
        address
    }

    fn clients(address: &str) -> RpcDaemonClients {
        let tls = ClientTlsConfig::Verify {
            root_certificate: testdata("ca.pem"),
            client_certificate: None,
            client_key: None,
        }
        .build()
        .unwrap();
        RpcDaemonClients::new(
            tls,
            &[endpoint("a", address)],
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn ok(request: &ActionRequest, data: ActionResults) -> ActionResponse {
        ActionResponse {
            status: ActionStatus::Ok,
            data,
            retcode: retcode::OK.clone(),
            id: request.id,
        }
    }

    #[tokio::test]
    async fn status_and_players() {
        let address = fake_daemon(|request| match request.parameters {
            ActionParameters::GetStatus {} => ok(
                &request,
                ActionResults::GetStatus {
                    status: PublicServerStatus::Running,
                },
            ),
            _ => ok(
                &request,
                ActionResults::ListUsers(OnlinePlayers {
                    online: 1,
                    max: 10,
                    users: vec!["alice".into()],
                }),
            ),
        })
        .await;
        let clients = clients(&address);

        assert_eq!(clients.get_status("a").await, Ok(PublicServerStatus::Running));
        assert_eq!(clients.list_users("a").await.unwrap().users, vec!["alice"]);
    }

    #[tokio::test]
    async fn refused_operation_is_a_failed_outcome() {
        let address = fake_daemon(|request| ActionResponse {
            status: ActionStatus::Error,
            data: ActionResults::ActionError {},
            retcode: retcode::BAD_SERVER_STATE.with_message("server is Error"),
            id: request.id,
        })
        .await;
        let clients = clients(&address);

        let outcome = clients.operation("a", ServerOperation::Start).await.unwrap();
        assert_eq!(
            outcome,
            OperationOutcome::failed("Bad Server State: server is Error")
        );
        // the same answer to a query is a protocol failure
        assert!(matches!(
            clients.get_status("a").await,
            Err(RpcError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_and_unknown() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let clients = clients(&address);

        assert!(matches!(
            clients.get_status("a").await,
            Err(RpcError::Network { .. })
        ));
        assert_eq!(
            clients.list_users("b").await,
            Err(RpcError::UnknownEndpoint("b".into()))
        );
    }
}
