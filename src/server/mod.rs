pub mod api;

use crate::cli::Args;
use api::AppState;
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    /// Serves the API until the listener fails. TLS is used when enabled and both
    /// certificate and key paths are given.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = api::router(self.state.clone());

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                // Several crates in the tree enable rustls backends; pick one explicitly.
                let _ = rustls::crypto::ring::default_provider().install_default();
                let tls_config = axum_server::tls_rustls::RustlsConfig
                    ::from_pem_file(cert_path, key_path).await
                    .map_err(|e| {
                        error!("Failed to load TLS certificate {} / key {}: {}", cert_path, key_path, e);
                        e
                    })?;

                info!("Starting HTTPS server on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            (true, _, _) => {
                return Err("ENABLE_TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".into());
            }
            _ => {
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                    e
                })?;
                info!("Starting HTTP server on: http://{}", addr);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }

        Ok(())
    }
}
