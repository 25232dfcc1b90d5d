//! WebSocket handler for live dashboard updates
//!
//! Every frame is a JSON text message `{"event": ..., "data": ...}`. A new
//! client first receives `wallet.init` and `servers.init` with the cached
//! snapshot, then every `servers.refresh` and `wallet.refresh` as they happen.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::api::state::DashboardState;
use crate::events::Event;

pub const WALLET_INIT: &str = "wallet.init";
pub const SERVERS_INIT: &str = "servers.init";
pub const SERVERS_REFRESH: &str = "servers.refresh";
pub const WALLET_REFRESH: &str = "wallet.refresh";

#[derive(Serialize)]
struct Frame<'a, T: ?Sized> {
    event: &'a str,
    data: &'a T,
}

/// Encode one outgoing frame
pub fn frame<T: Serialize + ?Sized>(event: &str, data: &T) -> Option<String> {
    match serde_json::to_string(&Frame { event, data }) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("failed to encode {event}: {e}");
            None
        }
    }
}

/// Frame for a bus event, `None` for events the dashboard does not forward
fn event_frame(event: &Event) -> Option<String> {
    match event {
        Event::ServerRefresh(state) => frame(SERVERS_REFRESH, &**state),
        Event::WalletRefresh(state) => frame(WALLET_REFRESH, &**state),
        _ => None,
    }
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<DashboardState>,
) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: DashboardState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    // subscribe before reading the snapshot so no refresh falls in between
    let mut events = state.bus.subscribe("*.refresh");

    let wallet = state.wallet().await;
    let servers = state.servers().await;
    let servers: Vec<_> = servers.iter().map(|server| &**server).collect();

    for text in [
        frame(WALLET_INIT, &wallet.as_deref()),
        frame(SERVERS_INIT, &servers),
    ]
    .into_iter()
    .flatten()
    {
        if sender.send(Message::Text(text)).await.is_err() {
            debug!("WebSocket send failed, client disconnected");
            return;
        }
    }

    let ping = state.ping;
    let mut send_task = tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + ping, ping);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event bus closed");
                        break;
                    };

                    if let Some(text) = event_frame(&event)
                        && sender.send(Message::Text(text)).await.is_err() {
                            debug!("WebSocket send failed, client disconnected");
                            break;
                        }
                }

                _ = ticker.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        debug!("WebSocket ping failed, client disconnected");
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
