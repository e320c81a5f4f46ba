//! Control API server

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::SessionHandle;
use crate::ui::handlers;

/// Shared handler state
pub struct AppState {
    pub session: SessionHandle,
}

/// HTTP surface exposing the record/stop triggers
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: SessionHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState { session }),
        }
    }

    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/formats", get(handlers::get_formats))
            .route("/api/record", post(handlers::record))
            .route("/api/stop", post(handlers::stop))
            .with_state(self.state.clone());

        let router = match &self.config.static_dir {
            Some(dir) => api.fallback_service(ServeDir::new(dir)),
            None => api,
        };

        router.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid ui bind address: {}", e)))
    }

    /// Serve until the task is aborted
    pub async fn serve(self) -> Result<()> {
        let addr = self.address()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::error!("Control API failed: {}", e);
            }
        })
    }
}
