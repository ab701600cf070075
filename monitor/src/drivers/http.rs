use super::hub::{status_payload, StatusHub, REQUEST_UPDATE};
use crate::error::FleetError;
use crate::fleet::{EndpointStatus, MachineStatus, Monitor, ServerStatusReport};
use anyhow::Context;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use mcfleet_protocol::management::server::OperationOutcome;
use mcfleet_protocol::utils::{Driver, ShutdownSignal};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::select;
use tower_http::cors::{Any, CorsLayer};

/// Status hub and command surface over http.
pub struct HttpDriver {
    addr: SocketAddr,
    monitor: Arc<Monitor>,
    hub: Arc<StatusHub>,
}

#[derive(Clone)]
struct HttpState {
    monitor: Arc<Monitor>,
    hub: Arc<StatusHub>,
    shutdown: ShutdownSignal,
}

impl HttpDriver {
    pub fn new(addr: SocketAddr, monitor: Arc<Monitor>, hub: Arc<StatusHub>) -> Self {
        Self { addr, monitor, hub }
    }

    fn router(&self, shutdown: ShutdownSignal) -> Router {
        Router::new()
            .route("/status", get(status_handler))
            .route("/api/endpoints", get(list_endpoints))
            .route("/api/endpoints/{name}", get(endpoint_status))
            .route("/api/endpoints/{name}/server", get(server_status))
            .route("/api/endpoints/{name}/machine", get(machine_status))
            .route("/api/endpoints/{name}/machine/start", post(start_machine))
            .route("/api/endpoints/{name}/server/start", post(start_server))
            .route("/api/endpoints/{name}/server/stop", post(stop_server))
            .with_state(HttpState {
                monitor: self.monitor.clone(),
                hub: self.hub.clone(),
                shutdown,
            })
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST]),
            )
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> anyhow::Result<()> {
        info!("http listening on {}", listener.local_addr()?);
        let app = self
            .router(shutdown.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        let mut signal = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.wait().await;
                info!("http shutting down");
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for HttpDriver {
    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding http listener on {}", self.addr))?;
        self.serve(listener, shutdown).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Error)]
enum HandlerError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = match &self {
            HandlerError::Fleet(FleetError::UnknownEndpoint(_)) => StatusCode::NOT_FOUND,
            HandlerError::Fleet(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(OperationOutcome::failed(self.to_string()))).into_response()
    }
}

async fn status_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<HttpState>,
) -> impl IntoResponse {
    debug!("status subscriber connecting from {}", addr);
    ws.on_upgrade(move |socket| async move {
        match serve_subscriber(socket, state).await {
            Ok(()) => debug!("status subscriber {} left", addr),
            Err(err) => warn!("status subscriber {}: {}", addr, err),
        }
    })
}

async fn send_cached(
    outgoing: &mut SplitSink<WebSocket, Message>,
    state: &HttpState,
) -> anyhow::Result<()> {
    if let Some(payload) = status_payload(&state.monitor.all_cached_statuses()) {
        outgoing.send(Message::Text(payload.into())).await?;
    }
    Ok(())
}

// pushes every published snapshot; `request_update` is answered from cache
async fn serve_subscriber(socket: WebSocket, state: HttpState) -> anyhow::Result<()> {
    let (mut outgoing, mut incoming) = socket.split();
    let (id, mut updates) = state.hub.subscribe();
    let mut shutdown = state.shutdown.clone();

    let result = async {
        send_cached(&mut outgoing, &state).await?;
        loop {
            select! {
                msg = incoming.next() => match msg {
                    Some(Ok(Message::Text(text))) if text.as_str().trim() == REQUEST_UPDATE => {
                        send_cached(&mut outgoing, &state).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                },
                payload = updates.recv() => match payload {
                    Some(payload) => outgoing.send(Message::Text(payload.into())).await?,
                    None => break,
                },
                _ = shutdown.wait() => {
                    outgoing
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "monitor shutting down".into(),
                        })))
                        .await?;
                    break;
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    state.hub.unsubscribe(id);
    result
}

async fn list_endpoints(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.monitor.endpoint_names().to_vec())
}

async fn endpoint_status(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<EndpointStatus>, HandlerError> {
    Ok(Json(state.monitor.cached_endpoint(&name)?))
}

async fn server_status(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<ServerStatusReport>, HandlerError> {
    Ok(Json(state.monitor.cached_server_status(&name)?))
}

async fn machine_status(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<MachineStatus>, HandlerError> {
    Ok(Json(state.monitor.cached_machine_status(&name)?))
}

async fn start_machine(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<OperationOutcome>, HandlerError> {
    Ok(Json(state.monitor.start_machine(&name).await?))
}

async fn start_server(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<OperationOutcome>, HandlerError> {
    Ok(Json(state.monitor.start_server(&name).await?))
}

async fn stop_server(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Json<OperationOutcome>, HandlerError> {
    Ok(Json(state.monitor.stop_server(&name).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::monitor_tests::fixture;
    use crate::fleet::{StatusPublisher, Thresholds};
    use mcfleet_protocol::management::server::{PublicServerStatus, ServerOperation};
    use mcfleet_protocol::utils::Shutdown;
    use pretty_assertions::assert_eq;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    struct Running {
        addr: SocketAddr,
        shutdown: Shutdown,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    async fn start(monitor: Arc<Monitor>, hub: Arc<StatusHub>) -> Running {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let driver = HttpDriver::new(addr, monitor, hub);
        let signal = shutdown.subscribe();
        let task = tokio::spawn(async move { driver.serve(listener, signal).await });
        Running {
            addr,
            shutdown,
            task,
        }
    }

    #[tokio::test]
    async fn commands_and_queries() {
        let f = fixture(&["a"], Thresholds::from_minutes(10, 10, 10));
        f.machines.set("vm-a", Some("PowerState/running"));
        f.daemons.set("a", PublicServerStatus::Running, 3);
        f.monitor.poll_once().await.unwrap();
        let daemons = f.daemons.clone();
        let server = start(Arc::new(f.monitor), Arc::new(StatusHub::new())).await;

        let client = reqwest::Client::new();
        let base = format!("http://{}/api/endpoints", server.addr);

        let names: Vec<String> = client
            .get(&base)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(names, vec!["a".to_string()]);

        let report: ServerStatusReport = client
            .get(format!("{}/a/server", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.online, 3);

        let missing = client
            .get(format!("{}/zzz/machine", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let missing = client
            .post(format!("{}/zzz/server/stop", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let outcome: OperationOutcome = client
            .post(format!("{}/a/server/stop", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::completed());
        assert_eq!(
            *daemons.operations.lock().unwrap(),
            vec![("a".to_string(), ServerOperation::Stop)]
        );

        server.shutdown.trigger();
        server.task.await.unwrap().unwrap();
    }

    type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn next_event(ws: &mut WsClient) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn subscribers_get_cache_then_updates() {
        let f = fixture(&["a"], Thresholds::from_minutes(10, 10, 10));
        let monitor = Arc::new(f.monitor);
        let hub = Arc::new(StatusHub::new());
        let server = start(monitor.clone(), hub.clone()).await;

        let (mut ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/status", server.addr))
                .await
                .unwrap();

        // not polled yet
        let first = next_event(&mut ws).await;
        assert_eq!(first["event"], "status_updated");
        assert_eq!(first["endpoints"][0]["machine"]["power_state"], "local_error");

        f.machines.set("vm-a", Some("PowerState/deallocated"));
        monitor.poll_once().await.unwrap();
        hub.publish_snapshot(monitor.all_cached_statuses()).await;
        let pushed = next_event(&mut ws).await;
        assert_eq!(pushed["endpoints"][0]["machine"]["power_state"], "deallocated");

        ws.send(WsMessage::Text(REQUEST_UPDATE.into())).await.unwrap();
        let answered = next_event(&mut ws).await;
        assert_eq!(answered, pushed);

        server.shutdown.trigger();
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(frame))) => {
                    assert_eq!(frame.unwrap().reason, "monitor shutting down");
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {:?}", other),
            }
        }
        server.task.await.unwrap().unwrap();
    }
}
