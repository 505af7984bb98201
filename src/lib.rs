pub mod api;
pub mod cli;
pub mod edge;
pub mod guard;
pub mod routes;
pub mod session;
pub mod store;
pub mod token;

use api::{ApiClient, ApiError};
use axum::{Json, Router, middleware, routing::get};
use edge::{EdgeState, edge_gate};
use routes::RouteTable;
use serde_json::{Value, json};
use session::{SessionConfig, SessionResolver};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::{TokenBackend, TokenStore};
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use url::Url;

pub struct GateConfig {
    /// Directory holding the built page shell (must contain `index.html`)
    pub dist: PathBuf,
    /// Route classification consulted by the edge gate
    pub routes: RouteTable,
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

/// Create the edge-gated application router.
///
/// Pages are served from `dist`, falling back to `index.html` so the
/// client router can resolve deep links.
pub fn create_app(config: &GateConfig) -> Router {
    let state = EdgeState::new(config.routes.clone());

    let pages = ServeDir::new(&config.dist)
        .fallback(ServeFile::new(config.dist.join("index.html")));

    Router::new()
        .route("/api/health", get(health))
        .fallback_service(pages)
        .layer(middleware::from_fn_with_state(state, edge_gate))
        .layer(TraceLayer::new_for_http())
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: GateConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    axum::serve(listener, app).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a
/// random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: GateConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}

/// Wire a token store, API client and resolver for the API at `api_url`.
pub fn open_session(
    api_url: Url,
    backend: impl TokenBackend + 'static,
    config: SessionConfig,
) -> Result<SessionResolver<ApiClient>, ApiError> {
    let store = Arc::new(TokenStore::open(backend, api_url.clone()));
    let client = ApiClient::new(api_url, store.clone())?;
    Ok(SessionResolver::new(client, store, config))
}
