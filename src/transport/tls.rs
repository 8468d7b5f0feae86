//! # TLS Listener Support
//!
//! Loads PEM certificate and key material into a rustls server config, and
//! can generate a self-signed pair for development setups.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::TlsAcceptor;
use tracing::{info, instrument};

use crate::config::TlsSettings;
use crate::error::{ProtocolError, Result};

/// TLS server configuration
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: String,
    key_path: String,
}

impl TlsServerConfig {
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_string_lossy().to_string(),
            key_path: key_path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Build from listener settings, generating a self-signed pair first
    /// when requested and the files are missing.
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        let missing = !Path::new(&settings.cert_path).exists() || !Path::new(&settings.key_path).exists();
        if settings.generate_self_signed && missing {
            info!(cert = %settings.cert_path, "Generating self-signed certificate");
            return Self::generate_self_signed(&settings.cert_path, &settings.key_path)
                .map_err(|e| ProtocolError::TlsError(format!("Failed to generate certificate: {e}")));
        }
        Ok(Self::new(&settings.cert_path, &settings.key_path))
    }

    /// Generate a self-signed certificate for development/testing purposes
    pub fn generate_self_signed<P: AsRef<Path>>(cert_path: P, key_path: P) -> io::Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

        let mut cert_file = File::create(&cert_path)?;
        cert_file.write_all(cert.cert.pem().as_bytes())?;

        let mut key_file = File::create(&key_path)?;
        key_file.write_all(cert.key_pair.serialize_pem().as_bytes())?;

        Ok(Self::new(cert_path, key_path))
    }

    /// Load the TLS configuration from files
    #[instrument(skip(self), fields(cert = %self.cert_path))]
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_file = File::open(&self.cert_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain: Vec<Certificate> = certs(&mut cert_reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse certificate".into()))?
            .into_iter()
            .map(Certificate)
            .collect();
        if cert_chain.is_empty() {
            return Err(ProtocolError::TlsError("No certificates found".into()));
        }

        let key_file = File::open(&self.key_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);
        let mut keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))?;
        if keys.is_empty() {
            return Err(ProtocolError::TlsError("No private keys found".into()));
        }
        let private_key = PrivateKey(keys.swap_remove(0));

        // Devices do not present client certificates.
        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_pair_loads() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        let config = TlsServerConfig::generate_self_signed(&cert, &key).unwrap();
        assert!(config.load_server_config().is_ok());
    }

    #[test]
    fn missing_files_are_tls_errors() {
        let config = TlsServerConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(
            config.load_server_config(),
            Err(ProtocolError::TlsError(_))
        ));
    }

    #[test]
    fn settings_generate_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let settings = TlsSettings {
            cert_path: dir.path().join("c.pem").to_string_lossy().to_string(),
            key_path: dir.path().join("k.pem").to_string_lossy().to_string(),
            generate_self_signed: true,
        };
        let config = TlsServerConfig::from_settings(&settings).unwrap();
        assert!(config.acceptor().is_ok());
    }
}
