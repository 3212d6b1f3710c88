//! `GridhubServer` — Axum HTTP + WebSocket server over the engine.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use gridhub_engine::Engine;

use crate::access;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The refresh engine.
    pub engine: Arc<Engine>,
    /// Server tunables.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The main Gridhub server.
pub struct GridhubServer {
    config: Arc<ServerConfig>,
    engine: Arc<Engine>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl GridhubServer {
    /// Create a new server over an engine.
    #[must_use]
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and the access gate.
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/login", get(login_handler))
            .route("/api/modules", get(modules_handler))
            .layer(axum::middleware::from_fn(access::gate))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(&self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "server listening");

        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }

    /// Get the shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.engine.hub().connection_count();
    let modules = state.engine.registry().len();
    Json(health::health_check(state.start_time, connections, modules))
}

/// GET /login — placeholder page; the dashboard frontend owns the real one.
async fn login_handler() -> &'static str {
    "gridhub: sign in required"
}

/// One row of the module listing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModuleSummary {
    id: String,
    kind: String,
    sizes: Vec<String>,
}

/// GET /api/modules — the live module instances and their sizes.
async fn modules_handler(State(state): State<AppState>) -> Json<Vec<ModuleSummary>> {
    let mut rows: Vec<ModuleSummary> = state
        .engine
        .registry()
        .instances()
        .into_iter()
        .map(|instance| ModuleSummary {
            id: instance.id.to_string(),
            kind: instance.kind.clone(),
            sizes: instance
                .adapter()
                .sizes()
                .into_iter()
                .map(|size| size.as_str().to_owned())
                .collect(),
        })
        .collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    Json(rows)
}
