//! Authorization bridge server.
//!
//! Serves the OAuth endpoints over HTTP and runs the background sweeps of
//! every expiring store.

pub mod oauth;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use transport::HttpState;

/// The OAuth bridge HTTP server.
pub struct BridgeServer {
    state: Arc<HttpState>,
}

impl BridgeServer {
    /// Create a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self { state: Arc::new(HttpState::from_config(config)?) })
    }

    /// Run the server in HTTP mode until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        tracing::info!(base_url = %self.state.base_url, "Starting OAuth bridge on port {}", port);

        let sweepers = self.state.start_cleanup_tasks();
        let router = transport::router_with_state(Arc::clone(&self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        for sweeper in sweepers {
            sweeper.abort();
        }
        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer").field("state", &self.state).finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
