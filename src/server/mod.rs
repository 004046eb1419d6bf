pub mod api;
pub mod completion;

use crate::cli::Args;
use self::api::{ router, AppState };
use std::error::Error;
use std::net::SocketAddr;
use log::{ error, info };

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = router(self.state.clone());

        if self.args.enable_tls {
            match (&self.args.tls_cert_path, &self.args.tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    info!(
                        "TLS enabled. Loading certificate from '{}' and key from '{}'",
                        cert_path,
                        key_path
                    );
                    let tls_config = axum_server::tls_rustls::RustlsConfig
                        ::from_pem_file(cert_path, key_path).await?;
                    info!("HTTPS server listening on: https://{}", addr);
                    axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
                }
                (Some(_), None) | (None, Some(_)) => {
                    error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                    return Err("Missing TLS certificate or key path".into());
                }
                (None, None) => {
                    error!("--enable-tls was set but no certificate/key paths provided.");
                    return Err("TLS enabled without cert/key".into());
                }
            }
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("HTTP server listening on: http://{}", addr);
            axum::serve(listener, app.into_make_service()).await?;
        }

        Ok(())
    }
}
