pub mod auth;
pub mod tls;
pub mod websocket;

use crate::cli::Args;
use crate::coach::Coach;
use log::{ info, warn, error };
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub struct Server {
    addr: String,
    coach: Arc<Coach>,
    api_key: Option<String>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, coach: Arc<Coach>, api_key: Option<String>, args: Args) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());

        if api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Connections are open.");
        }

        Self { addr, coach, api_key, args }
    }

    fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, Box<dyn Error + Send + Sync>> {
        if !self.args.enable_tls {
            info!("TLS not enabled. Running plain WebSocket (WS) server.");
            return Ok(None);
        }
        match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
                Ok(Some(tls::acceptor(cert_path, key_path)?))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                Err("Missing TLS certificate or key path".into())
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                Err("TLS enabled without cert/key".into())
            }
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls_acceptor = self.tls_acceptor()?;
        let listener = TcpListener::bind(&self.addr).await?;
        websocket::serve(listener, Arc::clone(&self.coach), self.api_key.clone(), tls_acceptor).await
    }
}
