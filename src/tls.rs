//! TLS configuration and certificate loading.

use crate::config::TlsConfig;
use crate::error::{ServerError, ServerResult};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

fn open(path: &Path, what: &str) -> ServerResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("cannot open {} {:?}: {}", what, path, e)))
}

/// Read every certificate from a PEM file
pub fn load_certs(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate file")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("bad certificate file {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!("no certificates in {:?}", path)));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file
pub fn load_private_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "private key file")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("bad private key file {:?}: {}", path, e)))?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {:?}", path)))
}

/// Build the rustls server configuration. With a verification CA, client
/// certificates are checked against it but not required.
pub fn load_server_config(tls: &TlsConfig) -> ServerResult<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(ring::default_provider());
    let certs = load_certs(&tls.cert_chain)?;
    let key = load_private_key(&tls.private_key)?;

    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match &tls.verify_ca {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .allow_unauthenticated()
                .build()
                .map_err(|e| ServerError::Tls(format!("client verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder.with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Acceptor wrapping [`load_server_config`]
pub fn acceptor(tls: &TlsConfig) -> ServerResult<TlsAcceptor> {
    Ok(TlsAcceptor::from(load_server_config(tls)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_files_are_config_errors() {
        let tls = TlsConfig {
            cert_chain: "/nonexistent/chain.pem".into(),
            private_key: "/nonexistent/key.pem".into(),
            verify_ca: None,
        };
        assert!(matches!(load_server_config(&tls), Err(ServerError::Tls(_))));
    }

    #[test]
    fn test_file_without_pem_blocks_rejected() {
        let path = std::env::temp_dir().join(format!("ahs-tls-empty-{}.pem", std::process::id()));
        fs::write(&path, "not a certificate\n").unwrap();

        assert!(matches!(load_certs(&path), Err(ServerError::Tls(_))));
        assert!(matches!(load_private_key(&path), Err(ServerError::Tls(_))));

        fs::remove_file(path).unwrap();
    }
}
