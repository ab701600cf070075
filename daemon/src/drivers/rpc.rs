use crate::config::RpcConfig;
use crate::protocols::v1::ProtocolV1;
use crate::protocols::Protocol;
use anyhow::Context;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use mcfleet_protocol::transport::{self, ClientAuth};
use mcfleet_protocol::utils::{Driver, ShutdownSignal};
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;

/// Serves the control protocol to the fleet monitor over TLS websockets.
pub struct RpcDriver {
    addr: SocketAddr,
    handshake_timeout: Duration,
    tls: Arc<ServerConfig>,
    protocol: Arc<ProtocolV1>,
}

impl RpcDriver {
    pub fn new(config: &RpcConfig, protocol: ProtocolV1) -> anyhow::Result<Self> {
        let client_auth = match (&config.client_ca, config.require_client_certificate) {
            (Some(ca), true) => ClientAuth::Required(
                transport::load_root_store(ca).context("loading rpc.client_ca")?,
            ),
            (None, true) => anyhow::bail!("rpc.require_client_certificate needs rpc.client_ca"),
            (_, false) => ClientAuth::None,
        };
        let tls = transport::server_config(&config.certificate, &config.key, client_auth)
            .context("building rpc tls config")?;

        Ok(Self {
            addr: config.addr(),
            handshake_timeout: config.handshake_timeout(),
            tls,
            protocol: Arc::new(protocol),
        })
    }

    async fn serve(&self, listener: TcpListener, mut shutdown: ShutdownSignal) {
        let mut connections = JoinSet::new();
        loop {
            select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("rpc connection from {}", peer);
                        connections.spawn(serve_connection(
                            self.tls.clone(),
                            stream,
                            peer,
                            self.handshake_timeout,
                            self.protocol.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => warn!("could not accept rpc connection: {}", err),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!("rpc connection task failed: {}", err);
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("rpc driver closing {} connection(s)", connections.len());
        while connections.join_next().await.is_some() {}
    }
}

#[async_trait::async_trait]
impl Driver for RpcDriver {
    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding rpc listener on {}", self.addr))?;
        info!("rpc server listening on {}", self.addr);
        self.serve(listener, shutdown).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}

async fn serve_connection(
    tls: Arc<ServerConfig>,
    stream: TcpStream,
    peer: SocketAddr,
    handshake_timeout: Duration,
    protocol: Arc<ProtocolV1>,
    mut shutdown: ShutdownSignal,
) {
    let mut ws = match transport::accept(tls, stream, handshake_timeout).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!("rpc handshake with {} failed: {}", peer, err);
            return;
        }
    };

    loop {
        let message = select! {
            message = ws.next() => message,
            _ = shutdown.wait() => break,
        };

        let process = async {
            match message {
                Some(Ok(Message::Text(text))) => Ok(protocol.process_text(&text).await),
                Some(Ok(Message::Binary(bin))) => Ok(protocol.process_binary(&bin).await),
                Some(Ok(Message::Close(_))) | None => Err(None),
                Some(Ok(_)) => Ok(None),
                Some(Err(err)) => Err(Some(err)),
            }
        };
        // a stop waits for the server to exit; shutdown must not wait for it
        let reply = select! {
            reply = process => reply,
            _ = shutdown.wait() => break,
        };

        match reply {
            Ok(Some(reply)) => {
                if let Err(err) = ws.send(Message::Text(reply)).await {
                    debug!("could not reply to {}: {}", peer, err);
                    break;
                }
            }
            Ok(None) => {}
            Err(None) => break,
            Err(Some(err)) => {
                debug!("rpc connection with {} broken: {}", peer, err);
                break;
            }
        }
    }

    let _ = ws.close(None).await;
    debug!("rpc connection from {} closed", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSettings;
    use crate::management::Supervisor;
    use mcfleet_protocol::management::server::PublicServerStatus;
    use mcfleet_protocol::transport::{ClientTlsConfig, RpcConnector, TransportError};
    use mcfleet_protocol::utils::Shutdown;
    use mcfleet_protocol::v1::action::{ActionParameters, ActionRequest, ActionResults};
    use pretty_assertions::assert_eq;
    use rustls::pki_types::ServerName;
    use std::path::PathBuf;

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../testdata")
            .join(name)
    }

    fn rpc_config(require_client_certificate: bool) -> RpcConfig {
        RpcConfig {
            certificate: testdata("daemon.pem"),
            key: testdata("daemon.key"),
            client_ca: Some(testdata("ca.pem")),
            require_client_certificate,
            ..RpcConfig::default()
        }
    }

    async fn start_driver(
        require_client_certificate: bool,
    ) -> (String, Shutdown, tokio::task::JoinHandle<()>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(ServerSettings {
            directory: dir.path().to_path_buf(),
            ..ServerSettings::default()
        });
        let protocol = ProtocolV1::new(supervisor, Duration::from_secs(1));
        let driver = RpcDriver::new(&rpc_config(require_client_certificate), protocol).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let task = tokio::spawn(async move { driver.serve(listener, signal).await });
        (addr, shutdown, task, dir)
    }

    async fn get_status(
        tls: ClientTlsConfig,
        addr: &str,
    ) -> Result<ActionResults, TransportError> {
        let connector = RpcConnector::new(tls.build().unwrap());
        let name = ServerName::try_from("localhost").unwrap();
        let request = ActionRequest::new(ActionParameters::GetStatus {});
        connector
            .call(addr, &name, &request, Duration::from_secs(5))
            .await
            .map(|response| response.data)
    }

    #[tokio::test]
    async fn verified_call_round_trip() {
        let (addr, shutdown, task, _dir) = start_driver(false).await;

        let tls = ClientTlsConfig::Verify {
            root_certificate: testdata("ca.pem"),
            client_certificate: None,
            client_key: None,
        };
        assert_eq!(
            get_status(tls, &addr).await.unwrap(),
            ActionResults::GetStatus {
                status: PublicServerStatus::Stopped
            }
        );

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn mutual_tls_rejects_anonymous_clients() {
        let (addr, shutdown, task, _dir) = start_driver(true).await;

        let anonymous = ClientTlsConfig::Insecure {
            client_certificate: None,
            client_key: None,
        };
        assert!(get_status(anonymous, &addr).await.is_err());

        let identified = ClientTlsConfig::Verify {
            root_certificate: testdata("ca.pem"),
            client_certificate: Some(testdata("client.pem")),
            client_key: Some(testdata("client.key")),
        };
        assert!(get_status(identified, &addr).await.is_ok());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn untrusted_daemon_certificate_is_refused() {
        let (addr, shutdown, task, _dir) = start_driver(false).await;

        // the daemon leaf is not a trust anchor
        let tls = ClientTlsConfig::Verify {
            root_certificate: testdata("daemon.pem"),
            client_certificate: None,
            client_key: None,
        };
        assert!(get_status(tls, &addr).await.is_err());

        shutdown.trigger();
        task.await.unwrap();
    }
}
