//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::flows::{FlowRegistry, RouteInfo};
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// OAuth gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Grant flows
    registry: FlowRegistry,
    /// Shared handler state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// Every flow and resource server client is built here, so a broken
    /// configuration fails before the listener is bound.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = FlowRegistry::new(&config.authorization)?;
        Self::from_registry(config, registry)
    }

    /// Create a gateway whose outbound calls all go through `http_client`
    pub fn with_client(config: Config, http_client: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let registry = FlowRegistry::with_client(http_client, &config.authorization)?;
        Self::from_registry(config, registry)
    }

    fn from_registry(config: Config, registry: FlowRegistry) -> Result<Self> {
        let resource_servers = registry.create_resource_servers()?;
        for (name, client) in &resource_servers {
            info!(
                resource_server = %name,
                host = %client.config().host,
                endpoint = %client.config().endpoint.name,
                "Registered resource server"
            );
        }

        Ok(Self {
            config,
            registry,
            state: Arc::new(AppState { resource_servers }),
        })
    }

    /// Every mounted grant flow resource
    #[must_use]
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.registry.routes()
    }

    /// Router serving the gateway
    pub fn router(&self) -> Router {
        create_router(&self.registry, Arc::clone(&self.state))
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!("OAuth gateway listening on http://{addr}");
        for route in self.routes() {
            info!(method = %route.method, path = %route.path, purpose = route.purpose, "Route");
        }

        let shutdown_timeout = self.config.server.shutdown_timeout();
        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        // In-flight requests get `shutdown_timeout` to finish once the signal arrives
        tokio::select! {
            result = server => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = async {
                shutdown_signal().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                warn!(timeout_secs = shutdown_timeout.as_secs(), "Graceful shutdown timed out");
            }
        }

        info!("OAuth gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
