use super::TransportError;
use log::warn;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TransportError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TransportError::Certificate(format!("reading {}: {}", path.display(), e)))
}

/// Reads every certificate of a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Certificate(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(TransportError::Certificate(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the first private key (pkcs8, pkcs1 or sec1) of a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Certificate(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| {
            TransportError::Certificate(format!("no private key found in {}", path.display()))
        })
}

pub fn load_root_store(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Client certificate policy of the daemon's listener.
#[derive(Debug, Clone)]
pub enum ClientAuth {
    None,
    Required(RootCertStore),
}

pub fn server_config(
    certificate: &Path,
    key: &Path,
    client_auth: ClientAuth,
) -> Result<Arc<ServerConfig>, TransportError> {
    let provider = provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match client_auth {
        ClientAuth::None => builder.with_no_client_auth(),
        ClientAuth::Required(roots) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| TransportError::Configuration(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder.with_single_cert(load_certificates(certificate)?, load_private_key(key)?)?;
    Ok(Arc::new(config))
}

/// How the control plane authenticates daemons, and itself to them.
///
/// There is deliberately no default: the mode has to be spelled out in the
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClientTlsConfig {
    /// Verify the daemon certificate against `root_certificate`.
    Verify {
        root_certificate: PathBuf,
        #[serde(default)]
        client_certificate: Option<PathBuf>,
        #[serde(default)]
        client_key: Option<PathBuf>,
    },
    /// Accept any daemon certificate. Development only.
    Insecure {
        #[serde(default)]
        client_certificate: Option<PathBuf>,
        #[serde(default)]
        client_key: Option<PathBuf>,
    },
}

impl ClientTlsConfig {
    fn identity(&self) -> (Option<&PathBuf>, Option<&PathBuf>) {
        match self {
            ClientTlsConfig::Verify {
                client_certificate,
                client_key,
                ..
            }
            | ClientTlsConfig::Insecure {
                client_certificate,
                client_key,
            } => (client_certificate.as_ref(), client_key.as_ref()),
        }
    }

    pub fn build(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = match self {
            ClientTlsConfig::Verify {
                root_certificate, ..
            } => builder.with_root_certificates(load_root_store(root_certificate)?),
            ClientTlsConfig::Insecure { .. } => {
                warn!("daemon certificates will not be verified (tls mode `insecure')");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            }
        };

        let config = match self.identity() {
            (Some(cert), Some(key)) => {
                builder.with_client_auth_cert(load_certificates(cert)?, load_private_key(key)?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TransportError::Configuration(
                    "client_certificate and client_key must be set together".into(),
                ))
            }
        };
        Ok(Arc::new(config))
    }
}

/// Skips chain validation but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mode_must_be_explicit() {
        assert!(serde_json::from_str::<ClientTlsConfig>("{}").is_err());

        let insecure: ClientTlsConfig = serde_json::from_str(r#"{"mode": "insecure"}"#).unwrap();
        assert_eq!(
            insecure,
            ClientTlsConfig::Insecure {
                client_certificate: None,
                client_key: None
            }
        );
    }

    #[test]
    fn insecure_without_identity_builds() {
        let config = ClientTlsConfig::Insecure {
            client_certificate: None,
            client_key: None,
        };
        assert!(config.build().is_ok());
    }

    #[test]
    fn half_identity_is_rejected() {
        let config = ClientTlsConfig::Insecure {
            client_certificate: Some(PathBuf::from("client.pem")),
            client_key: None,
        };
        assert!(matches!(
            config.build(),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn missing_root_certificate_is_reported() {
        let config = ClientTlsConfig::Verify {
            root_certificate: PathBuf::from("/nonexistent/ca.pem"),
            client_certificate: None,
            client_key: None,
        };
        assert!(matches!(config.build(), Err(TransportError::Certificate(_))));
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_certificates(file.path()),
            Err(TransportError::Certificate(_))
        ));
        assert!(matches!(
            load_private_key(file.path()),
            Err(TransportError::Certificate(_))
        ));
    }
}
