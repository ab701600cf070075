use super::{MachineControl, MachineId, ProviderError};
use crate::config::AzureConfig;
use log::debug;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const LOGIN_URL: &str = "https://login.microsoftonline.com";
const MANAGEMENT_URL: &str = "https://management.azure.com";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const API_VERSION: &str = "2024-07-01";
// refresh the token this long before it expires
const TOKEN_SLACK: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceViewStatus>,
}

#[derive(Deserialize)]
struct InstanceViewStatus {
    #[serde(default)]
    code: Option<String>,
}

impl InstanceView {
    fn power_state(self) -> Option<String> {
        self.statuses
            .into_iter()
            .filter_map(|status| status.code)
            .find(|code| code.starts_with("PowerState/"))
    }
}

/// Azure Resource Manager virtual machines, authenticated as a service
/// principal.
pub struct AzureMachineControl {
    client: Client,
    config: AzureConfig,
    login_url: String,
    management_url: String,
    token: Mutex<Option<CachedToken>>,
}

fn unreachable(err: reqwest::Error) -> ProviderError {
    ProviderError::Unreachable(err.to_string())
}

impl AzureMachineControl {
    pub fn new(config: AzureConfig) -> Self {
        Self::with_endpoints(config, LOGIN_URL, MANAGEMENT_URL)
    }

    fn with_endpoints(config: AzureConfig, login_url: &str, management_url: &str) -> Self {
        Self {
            client: Client::new(),
            config,
            login_url: login_url.trim_end_matches('/').to_string(),
            management_url: management_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting azure management token");
        let url = format!("{}/{}/oauth2/v2.0/token", self.login_url, self.config.tenant_id);
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await
            .map_err(unreachable)?;
        let token: TokenResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn machine_url(&self, machine: &MachineId, action: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}/{}?api-version={}",
            self.management_url,
            self.config.subscription_id,
            machine.resource_group,
            machine.machine_name,
            action,
            API_VERSION
        )
    }

    async fn request(
        &self,
        method: Method,
        machine: &MachineId,
        action: &str,
    ) -> Result<Response, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .request(method, self.machine_url(machine, action))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(unreachable)?;
        Self::check(response).await
    }

    // long running operations answer 202 and finish on their own
    async fn invoke(&self, machine: &MachineId, action: &str) -> Result<(), ProviderError> {
        self.request(Method::POST, machine, action).await?;
        debug!("{} accepted for {}", action, machine);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MachineControl for AzureMachineControl {
    async fn start(&self, machine: &MachineId) -> Result<(), ProviderError> {
        self.invoke(machine, "start").await
    }

    async fn power_off(&self, machine: &MachineId) -> Result<(), ProviderError> {
        self.invoke(machine, "powerOff").await
    }

    async fn deallocate(&self, machine: &MachineId) -> Result<(), ProviderError> {
        self.invoke(machine, "deallocate").await
    }

    async fn power_state(&self, machine: &MachineId) -> Result<Option<String>, ProviderError> {
        let view: InstanceView = self
            .request(Method::GET, machine, "instanceView")
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(view.power_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Calls {
        tokens: AtomicUsize,
        actions: std::sync::Mutex<Vec<String>>,
    }

    async fn fake_azure() -> (String, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let app = Router::new()
            .route(
                "/{tenant}/oauth2/v2.0/token",
                post(|State(calls): State<Arc<Calls>>| async move {
                    calls.tokens.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"access_token": "secret", "expires_in": 3600}))
                }),
            )
            .route(
                "/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{vm}/instanceView",
                get(|Path((_, _, vm)): Path<(String, String, String)>| async move {
                    let statuses: Value = match vm.as_str() {
                        "running" => json!([
                            {"code": "ProvisioningState/succeeded"},
                            {"code": "PowerState/running"}
                        ]),
                        _ => json!([{"code": "ProvisioningState/creating"}]),
                    };
                    Json(json!({ "statuses": statuses }))
                }),
            )
            .route(
                "/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{vm}/{action}",
                post(
                    |State(calls): State<Arc<Calls>>,
                     Path((_, _, vm, action)): Path<(String, String, String, String)>| async move {
                        calls.actions.lock().unwrap().push(format!("{}:{}", vm, action));
                        axum::http::StatusCode::ACCEPTED
                    },
                ),
            )
            .with_state(calls.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (url, calls)
    }

    fn control(url: &str) -> AzureMachineControl {
        AzureMachineControl::with_endpoints(
            AzureConfig {
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: "secret".into(),
                subscription_id: "sub".into(),
            },
            url,
            url,
        )
    }

    fn machine(name: &str) -> MachineId {
        MachineId {
            resource_group: "rg".into(),
            machine_name: name.into(),
        }
    }

    #[tokio::test]
    async fn power_state_and_token_cache() {
        let (url, calls) = fake_azure().await;
        let control = control(&url);

        assert_eq!(
            control.power_state(&machine("running")).await.unwrap(),
            Some("PowerState/running".to_string())
        );
        assert_eq!(control.power_state(&machine("new")).await.unwrap(), None);
        assert_eq!(calls.tokens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lifecycle_actions() {
        let (url, calls) = fake_azure().await;
        let control = control(&url);

        control.start(&machine("vm")).await.unwrap();
        control.power_off(&machine("vm")).await.unwrap();
        control.deallocate(&machine("vm")).await.unwrap();
        assert_eq!(
            *calls.actions.lock().unwrap(),
            vec!["vm:start", "vm:powerOff", "vm:deallocate"]
        );
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let control = control(&url);
        assert!(matches!(
            control.power_state(&machine("vm")).await,
            Err(ProviderError::Unreachable(_))
        ));
    }
}
