use mcfleet_protocol::transport::ClientTlsConfig;
use mcfleet_protocol::utils::{ConfigError, ConfigFile};
use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// One game server instance: the daemon next to it and the machine it runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    /// `host:port` of the daemon rpc listener
    pub server_address: String,
    /// name checked against the daemon certificate, defaults to the host part
    #[serde(default)]
    pub tls_server_name: Option<String>,
    pub resource_group: String,
    pub machine_name: String,
}

impl EndpointConfig {
    fn host(&self) -> Option<&str> {
        let (host, port) = self.server_address.rsplit_once(':')?;
        port.parse::<u16>().ok()?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        (!host.is_empty()).then_some(host)
    }

    pub fn server_name(&self) -> Result<ServerName<'static>, ConfigError> {
        let name = match &self.tls_server_name {
            Some(name) => name.as_str(),
            None => self.host().ok_or_else(|| {
                ConfigError::invalid(
                    "endpoints.server_address",
                    format!("`{}' is not host:port", self.server_address),
                )
            })?,
        };
        ServerName::try_from(name.to_string()).map_err(|e| {
            ConfigError::invalid("endpoints.tls_server_name", format!("`{}': {}", name, e))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl HttpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub endpoints: Vec<EndpointConfig>,
    /// seconds between two polls
    pub refresh_interval: u64,
    /// minutes without players before the server is stopped
    pub idle_server_shutdown_interval: u64,
    /// minutes with a stopped server before the machine is powered off
    pub server_power_off_interval: u64,
    /// minutes with a machine not running before it is deallocated
    pub server_deallocate_interval: u64,
    /// seconds, bounds every remote call of a poll
    pub rpc_timeout: u64,
    /// seconds, bounds start and stop requests
    pub operation_timeout: u64,
    pub tls: ClientTlsConfig,
    pub azure: AzureConfig,
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![EndpointConfig {
                name: "main".into(),
                server_address: "127.0.0.1:50051".into(),
                tls_server_name: Some("localhost".into()),
                resource_group: "minecraft".into(),
                machine_name: "minecraft-main".into(),
            }],
            refresh_interval: 5,
            idle_server_shutdown_interval: 15,
            server_power_off_interval: 10,
            server_deallocate_interval: 10,
            rpc_timeout: 10,
            operation_timeout: 90,
            tls: ClientTlsConfig::Verify {
                root_certificate: "certs/ca.pem".into(),
                client_certificate: None,
                client_key: None,
            },
            azure: AzureConfig {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                subscription_id: String::new(),
            },
            http: HttpConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8080,
            },
        }
    }
}

impl AppConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }
}

impl ConfigFile for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::invalid("endpoints", "at least one endpoint is required"));
        }
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return Err(ConfigError::invalid("endpoints.name", "must not be empty"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::invalid(
                    "endpoints.name",
                    format!("`{}' is configured twice", endpoint.name),
                ));
            }
            endpoint.server_name()?;
        }
        if self.refresh_interval == 0 {
            return Err(ConfigError::invalid("refresh_interval", "must be at least 1 second"));
        }
        if self.rpc_timeout == 0 || self.operation_timeout == 0 {
            return Err(ConfigError::invalid("rpc_timeout", "timeouts must be at least 1 second"));
        }
        let azure = [
            ("azure.tenant_id", &self.azure.tenant_id),
            ("azure.client_id", &self.azure.client_id),
            ("azure.client_secret", &self.azure.client_secret),
            ("azure.subscription_id", &self.azure.subscription_id),
        ];
        if let Some(&(field, _)) = azure.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::invalid(field, "must be set"));
        }
        Ok(())
    }
}

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

impl AppConfig {
    /// Loads `path`. A missing file is an error; a template is written in
    /// its place for the operator to fill in.
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            Self::default().save_config(path)?;
            return Err(ConfigError::invalid(
                "config",
                format!(
                    "{} did not exist, a template was written there; \
                     fill in the endpoints, tls and azure settings",
                    path.display()
                ),
            ));
        }
        Self::load_config(path)
    }

    pub fn init(path: &Path) -> Result<&'static AppConfig, ConfigError> {
        let config = Self::load(path)?;
        Ok(APP_CONFIG.get_or_init(|| config))
    }
}
