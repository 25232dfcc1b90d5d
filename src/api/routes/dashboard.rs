//! Snapshot endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::state::DashboardState;

/// GET /
///
/// Everything the dashboard shows in one response
pub async fn overview(State(state): State<DashboardState>) -> Json<Value> {
    let wallet = state.wallet().await;
    let servers = state.servers().await;

    Json(json!({
        "wallet": wallet.as_deref(),
        "servers": servers.iter().map(|server| &**server).collect::<Vec<_>>(),
    }))
}

/// GET /wallet
pub async fn wallet(State(state): State<DashboardState>) -> Json<Value> {
    let wallet = state.wallet().await;
    Json(json!(wallet.as_deref()))
}

/// GET /servers
pub async fn servers(State(state): State<DashboardState>) -> Json<Value> {
    let servers = state.servers().await;
    Json(json!(
        servers.iter().map(|server| &**server).collect::<Vec<_>>()
    ))
}
