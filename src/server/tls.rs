//! Server-side TLS for accepted connections.
//!
//! The handshake runs before protocol detection, so both wire families are
//! served unchanged over the encrypted stream.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::server::TlsStream;

use crate::config::TlsConfig;
use crate::server::transport::Transport;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to load certificate from {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKeyLoad { path: PathBuf, reason: String },
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl TlsError {
    fn cert_load(path: &Path, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn key_load(path: &Path, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Reads every certificate of a PEM chain.
fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::cert_load(path, "no certificates found in file"));
    }
    Ok(certs)
}

/// Reads the first private key of a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}

/// Upgrades accepted streams to TLS.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    pub fn new(config: &TlsConfig) -> Result<Self, TlsError> {
        let cert_path = config
            .cert_path
            .as_deref()
            .ok_or_else(|| TlsError::Config("cert_path is required".to_string()))?;
        let key_path = config
            .key_path
            .as_deref()
            .ok_or_else(|| TlsError::Config("key_path is required".to_string()))?;

        let certs = load_certificates(cert_path)?;
        let key = load_private_key(key_path)?;

        let provider = tokio_rustls::rustls::crypto::ring::default_provider();
        let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Config(format!("Failed to set protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Config(format!("Failed to build TLS config: {e}")))?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    pub async fn accept<S: Transport>(&self, stream: S) -> Result<TlsStream<S>, TlsError> {
        self.inner.accept(stream).await.map_err(TlsError::Handshake)
    }
}

impl<S: Transport> Transport for TlsStream<S> {
    fn is_secure(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(cert_path: Option<&Path>, key_path: Option<&Path>) -> TlsConfig {
        TlsConfig {
            enabled: true,
            cert_path: cert_path.map(Path::to_path_buf),
            key_path: key_path.map(Path::to_path_buf),
        }
    }

    #[test]
    fn test_acceptor_requires_paths() {
        let key = Path::new("/key.pem");
        assert!(matches!(
            TlsAcceptor::new(&config(None, Some(key))),
            Err(TlsError::Config(_))
        ));
        let cert = Path::new("/cert.pem");
        assert!(matches!(
            TlsAcceptor::new(&config(Some(cert), None)),
            Err(TlsError::Config(_))
        ));
    }

    #[test]
    fn test_acceptor_missing_certificate_file() {
        let result = TlsAcceptor::new(&config(
            Some(Path::new("/nonexistent/cert.pem")),
            Some(Path::new("/nonexistent/key.pem")),
        ));
        assert!(matches!(result, Err(TlsError::CertificateLoad { .. })));
    }

    #[test]
    fn test_acceptor_rejects_file_without_certificates() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let result = TlsAcceptor::new(&config(
            Some(cert.path()),
            Some(Path::new("/nonexistent/key.pem")),
        ));
        let Err(TlsError::CertificateLoad { reason, .. }) = result else {
            panic!("expected a certificate load error");
        };
        assert!(reason.contains("no certificates"), "{reason}");
    }
}
