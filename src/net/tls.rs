//! Client TLS configuration assembled from PEM files.
//!
//! Trust material is always explicit: `ssl://` and `wss://` brokers require
//! a CA bundle path (plus an optional client identity for mutual TLS).
//! There is no implicit system trust store.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pem material in {path}: {detail}")]
    InvalidPem { path: String, detail: String },
    #[error("tls configuration rejected: {0}")]
    Config(String),
    #[error("a CA bundle path is required for tls brokers")]
    MissingTrustAnchor,
}

/// Transport TLS parameters from client options.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM bundle of trusted roots.
    pub ca_path: Option<PathBuf>,
    /// Client certificate chain for mutual TLS.
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS.
    pub client_key_path: Option<PathBuf>,
    /// Override for the name verified against the broker certificate;
    /// defaults to the broker URL host.
    pub server_name: Option<String>,
    pub alpn: Vec<String>,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    pub fn with_client_identity(
        mut self,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert.into());
        self.client_key_path = Some(key.into());
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    certs.map_err(|err| TlsError::InvalidPem {
        path: path.display().to_string(),
        detail: err.to_string(),
    })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| TlsError::InvalidPem {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?
        .ok_or_else(|| TlsError::InvalidPem {
            path: path.display().to_string(),
            detail: "no private key found".into(),
        })
}

/// Build a rustls client config from the supplied options.
pub fn build_client_config(options: &TlsOptions) -> Result<ClientConfig, TlsError> {
    let ca_path = options.ca_path.as_ref().ok_or(TlsError::MissingTrustAnchor)?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|err| TlsError::Config(err.to_string()))?;
    }
    if roots.is_empty() {
        return Err(TlsError::InvalidPem {
            path: ca_path.display().to_string(),
            detail: "no certificates found".into(),
        });
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let mut config = match (&options.client_cert_path, &options.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let chain = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|err| TlsError::Config(err.to_string()))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(TlsError::Config(
                "client certificate and key must be supplied together".into(),
            ))
        }
    };
    config.alpn_protocols = options.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}
