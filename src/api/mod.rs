//! HTTP dashboard and WebSocket broadcaster
//!
//! The dashboard never queries the actors. It keeps its own last-value cache
//! of every target and the wallet, fed by the event bus.
//!
//! ## Endpoints
//!
//! - `GET /` - Wallet and all servers in one response
//! - `GET /wallet` - Wallet state, `null` before the first refresh
//! - `GET /servers` - All servers ordered by address
//! - `WS /ws` - `wallet.init` / `servers.init` snapshots, then live refreshes

pub mod routes;
pub mod state;
pub mod websocket;

pub use state::DashboardState;

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiConfig;

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::dashboard::overview))
        .route("/wallet", get(routes::dashboard::wallet))
        .route("/servers", get(routes::dashboard::servers))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(
    config: &ApiConfig,
    state: DashboardState,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    let app = router(state);

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
