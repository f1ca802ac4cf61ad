//! Relay server

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, ApiState};
use crate::config::ServerConfig;
use crate::store::{RelayStore, SqliteRelayStore};

/// Relay server
pub struct RelayServer {
    config: ServerConfig,
    store: Arc<dyn RelayStore>,
}

impl RelayServer {
    /// Open the store named by `config`
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let store = Arc::new(SqliteRelayStore::new(&config.database_path).await?);
        info!(path = %config.database_path.display(), "opened relay database");
        Ok(Self::with_store(config, store))
    }

    /// Serve from an already opened store
    pub fn with_store(config: ServerConfig, store: Arc<dyn RelayStore>) -> Self {
        Self { config, store }
    }

    /// The full HTTP application, request tracing included
    pub fn router(&self) -> Router {
        let state = ApiState::new(self.store.clone(), &self.config);
        create_router(state, self.config.max_body_bytes())
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Run until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        info!("Starting relay on {}", self.config.listen_addr);

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                }
            })
            .await?;

        Ok(())
    }
}
