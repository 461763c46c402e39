use std::sync::Arc;

use tokio::net::TcpListener;

use lestash_store::ChangeLogStore;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// Serves a store's change log to pulling peers.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<dyn ChangeLogStore>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, store: Arc<dyn ChangeLogStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(AppState { store: self.store.clone() })
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        let app = self.router();
        tracing::info!(%addr, "sync server listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
