use mcfleet_protocol::utils::{ConfigError, ConfigFile};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// immutable through full lifetime of app, unless restart app.
pub struct AppConfig {
    pub server: ServerSettings,
    pub rpc: RpcConfig,
    /// launch the server as soon as the daemon is up
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            rpc: RpcConfig::default(),
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub directory: PathBuf,
    /// resolved against `directory` unless absolute
    pub executable: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// seconds between two `list` commands
    pub list_interval: u64,
    /// retained output lines
    pub output_history: usize,
    /// seconds a Stop request waits for the process to exit
    pub stop_timeout: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("bedrock_server"),
            executable: PathBuf::from("bedrock_server"),
            arguments: vec![],
            list_interval: 10,
            output_history: 1000,
            stop_timeout: 60,
        }
    }
}

impl ServerSettings {
    pub fn executable_path(&self) -> PathBuf {
        self.directory.join(&self.executable)
    }

    pub fn list_interval(&self) -> Duration {
        Duration::from_secs(self.list_interval)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub host: IpAddr,
    pub port: u16,
    /// PEM certificate chain presented to the control plane
    pub certificate: PathBuf,
    pub key: PathBuf,
    /// CA that signs accepted client certificates
    #[serde(default)]
    pub client_ca: Option<PathBuf>,
    #[serde(default)]
    pub require_client_certificate: bool,
    /// seconds allowed for the TLS + websocket handshake
    pub handshake_timeout: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 50051,
            certificate: PathBuf::from("certs/daemon.pem"),
            key: PathBuf::from("certs/daemon.key"),
            client_ca: None,
            require_client_certificate: false,
            handshake_timeout: 10,
        }
    }
}

impl RpcConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

impl ConfigFile for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.executable.as_os_str().is_empty() {
            return Err(ConfigError::invalid("server.executable", "must not be empty"));
        }
        if self.server.list_interval == 0 {
            return Err(ConfigError::invalid("server.list_interval", "must be at least 1 second"));
        }
        if self.rpc.require_client_certificate && self.rpc.client_ca.is_none() {
            return Err(ConfigError::invalid(
                "rpc.client_ca",
                "required when rpc.require_client_certificate is set",
            ));
        }
        Ok(())
    }
}

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

impl AppConfig {
    pub fn init(path: &Path) -> Result<&'static AppConfig, ConfigError> {
        let config = Self::load_config_or_default(path, Self::default)?;
        Ok(APP_CONFIG.get_or_init(|| config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ca_required_for_mutual_tls() {
        let mut config = AppConfig::default();
        config.rpc.require_client_certificate = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "rpc.client_ca", .. })
        ));

        config.rpc.client_ca = Some(PathBuf::from("certs/ca.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn absolute_executable_ignores_directory() {
        let settings = ServerSettings {
            executable: PathBuf::from("/bin/sh"),
            ..ServerSettings::default()
        };
        assert_eq!(settings.executable_path(), PathBuf::from("/bin/sh"));
    }
}
