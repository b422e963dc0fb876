use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::CertificateDer;
use rustls_pemfile::{ certs, private_key };
use tokio_rustls::TlsAcceptor;

pub fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;
    if cert_chain.is_empty() {
        return Err(format!("No certificates found in '{}'", cert_path).into());
    }

    let key = private_key(&mut key_reader)
        .map_err(|e| format!("Error reading private key: {}", e))?
        .ok_or_else(|| format!("No private key found in '{}'", key_path))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

pub fn acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, Box<dyn Error + Send + Sync>> {
    Ok(TlsAcceptor::from(load_tls_config(cert_path, key_path)?))
}
