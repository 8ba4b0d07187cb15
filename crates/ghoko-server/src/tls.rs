//! TLS listener configuration
//!
//! A certificate chain and private key are read from PEM files. The server
//! negotiates HTTP/1.1 through ALPN.

use ghoko_common::{GhokoError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// PEM certificate and key locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(load_server_config(self)?))
    }
}

/// Builds a rustls server config from `tls`.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| GhokoError::Tls(format!("TLS config: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GhokoError::Tls(format!("TLS config: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| GhokoError::Tls(format!("TLS {} open {}: {}", what, path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "cert")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GhokoError::Tls(format!("TLS cert parse {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(GhokoError::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| GhokoError::Tls(format!("TLS key parse {}: {}", path.display(), e)))?
        .ok_or_else(|| GhokoError::Tls(format!("no private key in {}", path.display())))
}
